//! Bit-field helpers shared by the word codecs.

/// Mask of the low `width` bits; `width >= 64` yields all ones.
#[must_use]
pub const fn mask64(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Mask of the low `width` bits of a 128-bit word.
#[must_use]
pub const fn mask128(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Extracts `width` bits starting at `lsb`.
#[must_use]
pub const fn field64(value: u64, lsb: u32, width: u32) -> u64 {
    if lsb >= 64 {
        0
    } else {
        (value >> lsb) & mask64(width)
    }
}

/// Extracts `width` bits starting at `lsb` of a 128-bit word.
#[must_use]
pub const fn field128(value: u128, lsb: u32, width: u32) -> u128 {
    if lsb >= 128 {
        0
    } else {
        (value >> lsb) & mask128(width)
    }
}

/// Replaces `width` bits starting at `lsb` with the low bits of `field`.
#[must_use]
pub const fn deposit128(value: u128, lsb: u32, width: u32, field: u128) -> u128 {
    if lsb >= 128 {
        return value;
    }
    let mask = mask128(width) << lsb;
    (value & !mask) | ((field << lsb) & mask)
}
