//! Stateful words: four 32-bit registers updated by a small instruction set.

use crate::bits::{deposit128, field128};

/// Register update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StatefulOp {
    /// Leave unchanged.
    #[default]
    Read,
    /// Wrapping add.
    Add,
    /// Wrapping subtract.
    Sub,
    /// Overwrite.
    Set,
    /// Keep the smaller.
    Min,
    /// Keep the larger.
    Max,
    /// Bitwise xor.
    Xor,
}

/// Value returned to the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StatefulOutput {
    /// Register before the update.
    #[default]
    Old,
    /// Register after the update.
    New,
}

/// One of the four instructions an ALU selects by address op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatefulInstr {
    /// Update.
    pub op: StatefulOp,
    /// Immediate operand.
    pub imm: u32,
    /// Returned value.
    pub output: StatefulOutput,
}

/// Applies `instr` to register `register & 3`, returning the new word and the output.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn execute_stateful(word: u128, register: u8, instr: StatefulInstr) -> (u128, u32) {
    let lane = u32::from(register & 0x3) * 32;
    let old = field128(word, lane, 32) as u32;
    let new = match instr.op {
        StatefulOp::Read => old,
        StatefulOp::Add => old.wrapping_add(instr.imm),
        StatefulOp::Sub => old.wrapping_sub(instr.imm),
        StatefulOp::Set => instr.imm,
        StatefulOp::Min => old.min(instr.imm),
        StatefulOp::Max => old.max(instr.imm),
        StatefulOp::Xor => old ^ instr.imm,
    };
    let output = match instr.output {
        StatefulOutput::Old => old,
        StatefulOutput::New => new,
    };
    (deposit128(word, lane, 32, u128::from(new)), output)
}

#[cfg(test)]
mod tests {
    use super::{execute_stateful, StatefulInstr, StatefulOp, StatefulOutput};
    use rstest::rstest;

    #[rstest]
    #[case(StatefulOp::Read, 10, 10)]
    #[case(StatefulOp::Add, 5, 15)]
    #[case(StatefulOp::Sub, 11, u32::MAX)]
    #[case(StatefulOp::Set, 3, 3)]
    #[case(StatefulOp::Min, 4, 4)]
    #[case(StatefulOp::Max, 4, 10)]
    #[case(StatefulOp::Xor, 0b11, 0b1001)]
    fn ops_update_selected_register(#[case] op: StatefulOp, #[case] imm: u32, #[case] expected: u32) {
        let word = 10u128 << 64;
        let instr = StatefulInstr {
            op,
            imm,
            output: StatefulOutput::New,
        };
        let (next, output) = execute_stateful(word, 2, instr);
        assert_eq!(output, expected);
        assert_eq!((next >> 64) as u32, expected);
        assert_eq!(next & u128::from(u64::MAX), 0);
    }

    #[test]
    fn old_output_returns_pre_update_value() {
        let instr = StatefulInstr {
            op: StatefulOp::Add,
            imm: 1,
            output: StatefulOutput::Old,
        };
        let (word, output) = execute_stateful(41, 0, instr);
        assert_eq!(output, 41);
        assert_eq!(word, 42);
    }
}
