//! Two-rate meter word and its header, end-of-packet and sweep behaviour.

use crate::bits::{deposit128, field128};

/// Color assigned at header time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MeterColor {
    /// Both buckets have credit.
    Green,
    /// Committed bucket exhausted.
    Yellow,
    /// Peak bucket exhausted.
    Red,
}

/// Decoded meter word: committed i32 | peak i32 | cir | pir | cbs | pbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MeterWord {
    /// Committed bucket level.
    pub committed: i32,
    /// Peak bucket level.
    pub peak: i32,
    /// Committed refill per sweep.
    pub cir: u16,
    /// Peak refill per sweep.
    pub pir: u16,
    /// Committed burst.
    pub cbs: u16,
    /// Peak burst.
    pub pbs: u16,
}

impl MeterWord {
    /// Decodes a RAM word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const fn from_word(word: u128) -> Self {
        Self {
            committed: field128(word, 0, 32) as u32 as i32,
            peak: field128(word, 32, 32) as u32 as i32,
            cir: field128(word, 64, 16) as u16,
            pir: field128(word, 80, 16) as u16,
            cbs: field128(word, 96, 16) as u16,
            pbs: field128(word, 112, 16) as u16,
        }
    }

    /// Encodes to a RAM word.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn to_word(&self) -> u128 {
        let word = deposit128(0, 0, 32, self.committed as u32 as u128);
        let word = deposit128(word, 32, 32, self.peak as u32 as u128);
        let word = deposit128(word, 64, 16, self.cir as u128);
        let word = deposit128(word, 80, 16, self.pir as u128);
        let word = deposit128(word, 96, 16, self.cbs as u128);
        deposit128(word, 112, 16, self.pbs as u128)
    }

    /// Header-time color.
    #[must_use]
    pub const fn color(&self) -> MeterColor {
        if self.peak <= 0 {
            MeterColor::Red
        } else if self.committed <= 0 {
            MeterColor::Yellow
        } else {
            MeterColor::Green
        }
    }

    /// Charges a packet of `bytes` to both buckets.
    #[must_use]
    pub fn debit(mut self, bytes: u64) -> Self {
        let charge = i32::try_from(bytes).unwrap_or(i32::MAX);
        self.committed = self.committed.saturating_sub(charge);
        self.peak = self.peak.saturating_sub(charge);
        self
    }

    /// Adds one refill interval of credit, clamped to the bursts.
    #[must_use]
    pub fn refill(mut self) -> Self {
        self.committed = self
            .committed
            .saturating_add(i32::from(self.cir))
            .min(i32::from(self.cbs));
        self.peak = self
            .peak
            .saturating_add(i32::from(self.pir))
            .min(i32::from(self.pbs));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{MeterColor, MeterWord};

    fn meter(committed: i32, peak: i32) -> MeterWord {
        MeterWord {
            committed,
            peak,
            cir: 100,
            pir: 200,
            cbs: 1000,
            pbs: 2000,
        }
    }

    #[test]
    fn color_thresholds() {
        assert_eq!(meter(1, 1).color(), MeterColor::Green);
        assert_eq!(meter(0, 1).color(), MeterColor::Yellow);
        assert_eq!(meter(-5, 1).color(), MeterColor::Yellow);
        assert_eq!(meter(100, 0).color(), MeterColor::Red);
    }

    #[test]
    fn word_codec_keeps_negative_levels() {
        let word = meter(-1500, 7).to_word();
        assert_eq!(MeterWord::from_word(word), meter(-1500, 7));
    }

    #[test]
    fn debit_then_refill_clamps_to_burst() {
        let level = meter(950, 1990).debit(100);
        assert_eq!((level.committed, level.peak), (850, 1890));
        let level = level.refill().refill();
        assert_eq!((level.committed, level.peak), (1000, 2000));
    }
}
