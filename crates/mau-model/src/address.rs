//! Bus address encoding shared by every ALU family.
//!
//! Raw layout, least significant first: subword (4) | index (10) | vpn (6) |
//! op (3) | pfe (1).

use crate::bits::mask64;

/// Address families. Selector and stateful addresses ride the meter buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AluKind {
    /// Action data RAM address.
    Action,
    /// Statistics ALU address.
    Stats,
    /// Meter ALU address (meter, selector or stateful mode).
    Meter,
    /// Idle-time ALU address.
    Idle,
}

/// Bits of the subword field.
pub const SUBWORD_BITS: u32 = 4;
/// Bits of the word index field.
pub const INDEX_BITS: u32 = 10;
/// Bits of the virtual page field.
pub const VPN_BITS: u32 = 6;
/// Bits of the op field.
pub const OP_BITS: u32 = 3;

const INDEX_SHIFT: u32 = SUBWORD_BITS;
const VPN_SHIFT: u32 = INDEX_SHIFT + INDEX_BITS;
const OP_SHIFT: u32 = VPN_SHIFT + VPN_BITS;
const PFE_SHIFT: u32 = OP_SHIFT + OP_BITS;

/// A decoded bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Address {
    /// Family.
    pub kind: AluKind,
    /// Virtual page.
    pub vpn: u8,
    /// Word within the page.
    pub index: u16,
    /// Entry within the word.
    pub subword: u8,
    /// ALU operation selector.
    pub op: u8,
    /// Per-flow enable.
    pub pfe: bool,
}

impl Address {
    /// Enabled address with op 0.
    #[must_use]
    pub const fn new(kind: AluKind, vpn: u8, index: u16, subword: u8) -> Self {
        Self {
            kind,
            vpn,
            index,
            subword,
            op: 0,
            pfe: true,
        }
    }

    /// Raw 24-bit encoding.
    #[must_use]
    pub fn raw(&self) -> u32 {
        let subword = u32::from(self.subword) & field_mask(SUBWORD_BITS);
        let index = u32::from(self.index) & field_mask(INDEX_BITS);
        let vpn = u32::from(self.vpn) & field_mask(VPN_BITS);
        let op = u32::from(self.op) & field_mask(OP_BITS);
        subword
            | (index << INDEX_SHIFT)
            | (vpn << VPN_SHIFT)
            | (op << OP_SHIFT)
            | (u32::from(self.pfe) << PFE_SHIFT)
    }

    /// Decodes a raw address of a known family.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(kind: AluKind, raw: u32) -> Self {
        Self {
            kind,
            subword: (raw & field_mask(SUBWORD_BITS)) as u8,
            index: ((raw >> INDEX_SHIFT) & field_mask(INDEX_BITS)) as u16,
            vpn: ((raw >> VPN_SHIFT) & field_mask(VPN_BITS)) as u8,
            op: ((raw >> OP_SHIFT) & field_mask(OP_BITS)) as u8,
            pfe: (raw >> PFE_SHIFT) & 1 == 1,
        }
    }

    /// Decodes a 20-bit match pointer: subword, index and vpn, with `op` and
    /// `pfe` supplied by the payload.
    #[must_use]
    pub fn from_pointer(kind: AluKind, pointer: u32, op: u8, pfe: bool) -> Self {
        let mut address = Self::from_raw(kind, pointer & field_mask(OP_SHIFT));
        address.op = op;
        address.pfe = pfe;
        address
    }

    /// Same address with the enable forced on.
    #[must_use]
    pub const fn enabled(mut self) -> Self {
        self.pfe = true;
        self
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn field_mask(width: u32) -> u32 {
    mask64(width) as u32
}

/// Inclusive range of VPNs a consumer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VpnRange {
    /// Lowest accepted VPN.
    pub base: u8,
    /// Highest accepted VPN.
    pub limit: u8,
}

impl Default for VpnRange {
    fn default() -> Self {
        Self::full()
    }
}

impl VpnRange {
    /// Range `[base, limit]`.
    #[must_use]
    pub const fn new(base: u8, limit: u8) -> Self {
        Self { base, limit }
    }

    /// Every encodable VPN.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            base: 0,
            limit: (1 << VPN_BITS) - 1,
        }
    }

    /// `vpn` lies within the range.
    #[must_use]
    pub const fn contains(&self, vpn: u8) -> bool {
        vpn >= self.base && vpn <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, AluKind, VpnRange};

    #[test]
    fn raw_layout() {
        let address = Address {
            kind: AluKind::Stats,
            vpn: 7,
            index: 15,
            subword: 1,
            op: 2,
            pfe: true,
        };
        assert_eq!(address.raw(), 1 | (15 << 4) | (7 << 14) | (2 << 20) | (1 << 23));
        assert_eq!(Address::from_raw(AluKind::Stats, address.raw()), address);
    }

    #[test]
    fn pointer_takes_op_and_pfe_from_payload() {
        let pointer = (3 << 14) | (9 << 4) | 2;
        let address = Address::from_pointer(AluKind::Meter, pointer | (7 << 20), 5, false);
        assert_eq!(address.vpn, 3);
        assert_eq!(address.index, 9);
        assert_eq!(address.subword, 2);
        assert_eq!(address.op, 5);
        assert!(!address.pfe);
        assert!(address.enabled().pfe);
    }

    #[test]
    fn fields_are_truncated_on_encode() {
        let address = Address {
            kind: AluKind::Idle,
            vpn: 0xFF,
            index: 0xFFFF,
            subword: 0xFF,
            op: 0xFF,
            pfe: false,
        };
        assert_eq!(address.raw(), 0x7F_FFFF);
    }

    #[test]
    fn vpn_range_is_inclusive() {
        let range = VpnRange::new(4, 7);
        assert!(!range.contains(3));
        assert!(range.contains(4));
        assert!(range.contains(7));
        assert!(!range.contains(8));
        assert!(VpnRange::full().contains(63));
    }
}
