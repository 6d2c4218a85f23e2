//! Idle-time words: sixteen 8-bit ages per word.

/// Entries per idle word.
pub const IDLE_ENTRIES: u8 = 16;

/// Raised when a sweep ages an entry to the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IdleNotification {
    /// Idle ALU.
    pub alu: u8,
    /// Virtual page.
    pub vpn: u8,
    /// Word within the page.
    pub index: u16,
    /// Entry within the word.
    pub subword: u8,
}

/// Age of one entry.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn idle_age(word: u128, subword: u8) -> u8 {
    (word >> ((subword % IDLE_ENTRIES) as u32 * 8)) as u8
}

/// Marks an entry as just hit.
#[must_use]
pub const fn idle_hit(word: u128, subword: u8) -> u128 {
    word & !(0xFFu128 << ((subword % IDLE_ENTRIES) as u32 * 8))
}

/// Ages every entry below `max` by one and reports the entries that reached it.
#[must_use]
pub fn idle_sweep(word: u128, max: u8) -> (u128, Vec<u8>) {
    let mut next = word;
    let mut reached = Vec::new();
    for subword in 0..IDLE_ENTRIES {
        let age = idle_age(word, subword);
        if age < max {
            let shift = u32::from(subword) * 8;
            next = (next & !(0xFFu128 << shift)) | (u128::from(age + 1) << shift);
            if age + 1 == max {
                reached.push(subword);
            }
        }
    }
    (next, reached)
}

#[cfg(test)]
mod tests {
    use super::{idle_age, idle_hit, idle_sweep};

    #[test]
    fn sweep_ages_until_max_and_notifies_once() {
        let (word, reached) = idle_sweep(0, 2);
        assert!(reached.is_empty());
        assert_eq!(idle_age(word, 15), 1);
        let (word, reached) = idle_sweep(word, 2);
        assert_eq!(reached.len(), 16);
        let (again, reached) = idle_sweep(word, 2);
        assert_eq!(again, word);
        assert!(reached.is_empty());
    }

    #[test]
    fn hit_resets_one_entry() {
        let (word, _) = idle_sweep(0, 5);
        let word = idle_hit(word, 3);
        assert_eq!(idle_age(word, 3), 0);
        assert_eq!(idle_age(word, 4), 1);
    }

    #[test]
    fn zero_max_disables_aging() {
        assert_eq!(idle_sweep(0, 0), (0, Vec::new()));
    }
}
