//! Statistics word formats.

use crate::bits::{deposit128, field128};

/// How counters are packed in a 128-bit stats word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StatsFormat {
    /// Two 64-bit packet counters.
    Packets,
    /// Two 64-bit byte counters.
    Bytes,
    /// One 64-bit packet and one 64-bit byte counter.
    #[default]
    PacketsAndBytes,
    /// Two entries of 28-bit packets and 36-bit bytes; counters wrap.
    Compressed,
}

const COMPRESSED_PACKET_BITS: u32 = 28;
const COMPRESSED_BYTE_BITS: u32 = 36;

/// Packet count above which a compressed entry is evicted by the sweep.
pub const COMPRESSED_EVICT_THRESHOLD: u64 = (1 << COMPRESSED_PACKET_BITS) / 8 * 7;

impl StatsFormat {
    /// Entries per word.
    #[must_use]
    pub const fn entries_per_word(self) -> u8 {
        match self {
            Self::PacketsAndBytes => 1,
            Self::Packets | Self::Bytes | Self::Compressed => 2,
        }
    }
}

/// One decoded counter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatsCounter {
    /// Packets.
    pub packets: u64,
    /// Bytes.
    pub bytes: u64,
}

/// Byte length charged to a counter after the ALU's adjustment, floored at 0.
#[must_use]
pub fn adjusted_bytes(len: u32, adjust: i16) -> u64 {
    let adjusted = i64::from(len) + i64::from(adjust);
    u64::try_from(adjusted.max(0)).unwrap_or(0)
}

/// Reads entry `subword` of a word.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn read_stats(word: u128, format: StatsFormat, subword: u8) -> StatsCounter {
    let lane = (subword & 1) as u32 * 64;
    match format {
        StatsFormat::Packets => StatsCounter {
            packets: field128(word, lane, 64) as u64,
            bytes: 0,
        },
        StatsFormat::Bytes => StatsCounter {
            packets: 0,
            bytes: field128(word, lane, 64) as u64,
        },
        StatsFormat::PacketsAndBytes => StatsCounter {
            packets: field128(word, 0, 64) as u64,
            bytes: field128(word, 64, 64) as u64,
        },
        StatsFormat::Compressed => StatsCounter {
            packets: field128(word, lane, COMPRESSED_PACKET_BITS) as u64,
            bytes: field128(word, lane + COMPRESSED_PACKET_BITS, COMPRESSED_BYTE_BITS) as u64,
        },
    }
}

/// Writes entry `subword` of a word, truncating to the format's widths.
#[must_use]
pub const fn write_stats(word: u128, format: StatsFormat, subword: u8, counter: StatsCounter) -> u128 {
    let lane = (subword & 1) as u32 * 64;
    match format {
        StatsFormat::Packets => deposit128(word, lane, 64, counter.packets as u128),
        StatsFormat::Bytes => deposit128(word, lane, 64, counter.bytes as u128),
        StatsFormat::PacketsAndBytes => {
            let word = deposit128(word, 0, 64, counter.packets as u128);
            deposit128(word, 64, 64, counter.bytes as u128)
        }
        StatsFormat::Compressed => {
            let word = deposit128(word, lane, COMPRESSED_PACKET_BITS, counter.packets as u128);
            deposit128(
                word,
                lane + COMPRESSED_PACKET_BITS,
                COMPRESSED_BYTE_BITS,
                counter.bytes as u128,
            )
        }
    }
}

/// Counts one packet of `bytes` into entry `subword`.
#[must_use]
pub const fn count_stats(word: u128, format: StatsFormat, subword: u8, bytes: u64) -> u128 {
    let current = read_stats(word, format, subword);
    let next = StatsCounter {
        packets: current.packets.wrapping_add(1),
        bytes: current.bytes.wrapping_add(bytes),
    };
    write_stats(word, format, subword, next)
}

/// Compressed entries of a word that crossed the eviction threshold.
#[must_use]
pub fn entries_to_evict(word: u128, format: StatsFormat) -> Vec<u8> {
    if format != StatsFormat::Compressed {
        return Vec::new();
    }
    (0..2u8)
        .filter(|subword| read_stats(word, format, *subword).packets > COMPRESSED_EVICT_THRESHOLD)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        adjusted_bytes, count_stats, entries_to_evict, read_stats, write_stats, StatsCounter,
        StatsFormat, COMPRESSED_EVICT_THRESHOLD,
    };
    use rstest::rstest;

    #[rstest]
    #[case(StatsFormat::Packets, 1, StatsCounter { packets: 1, bytes: 0 })]
    #[case(StatsFormat::Bytes, 0, StatsCounter { packets: 0, bytes: 100 })]
    #[case(StatsFormat::PacketsAndBytes, 0, StatsCounter { packets: 1, bytes: 100 })]
    #[case(StatsFormat::Compressed, 1, StatsCounter { packets: 1, bytes: 100 })]
    fn single_count_per_format(
        #[case] format: StatsFormat,
        #[case] subword: u8,
        #[case] expected: StatsCounter,
    ) {
        let word = count_stats(0, format, subword, 100);
        assert_eq!(read_stats(word, format, subword), expected);
    }

    #[test]
    fn entries_do_not_alias() {
        let word = count_stats(0, StatsFormat::Compressed, 0, 64);
        let word = count_stats(word, StatsFormat::Compressed, 1, 1500);
        assert_eq!(
            read_stats(word, StatsFormat::Compressed, 0),
            StatsCounter {
                packets: 1,
                bytes: 64
            }
        );
        assert_eq!(read_stats(word, StatsFormat::Compressed, 1).bytes, 1500);
    }

    #[test]
    fn compressed_counters_wrap() {
        let full = StatsCounter {
            packets: (1 << 28) - 1,
            bytes: (1 << 36) - 10,
        };
        let word = write_stats(0, StatsFormat::Compressed, 0, full);
        let word = count_stats(word, StatsFormat::Compressed, 0, 20);
        assert_eq!(
            read_stats(word, StatsFormat::Compressed, 0),
            StatsCounter {
                packets: 0,
                bytes: 10
            }
        );
        assert_eq!(read_stats(word, StatsFormat::Compressed, 1), StatsCounter::default());
    }

    #[test]
    fn byte_adjust_is_floored() {
        assert_eq!(adjusted_bytes(64, -4), 60);
        assert_eq!(adjusted_bytes(64, 8), 72);
        assert_eq!(adjusted_bytes(3, -10), 0);
    }

    #[test]
    fn eviction_threshold_is_seven_eighths() {
        let hot = StatsCounter {
            packets: COMPRESSED_EVICT_THRESHOLD + 1,
            bytes: 0,
        };
        let word = write_stats(0, StatsFormat::Compressed, 1, hot);
        assert_eq!(entries_to_evict(word, StatsFormat::Compressed), vec![1]);
        assert!(entries_to_evict(word, StatsFormat::Packets).is_empty());
        let cold = write_stats(0, StatsFormat::Compressed, 1, StatsCounter {
            packets: COMPRESSED_EVICT_THRESHOLD,
            bytes: 0,
        });
        assert!(entries_to_evict(cold, StatsFormat::Compressed).is_empty());
    }
}
