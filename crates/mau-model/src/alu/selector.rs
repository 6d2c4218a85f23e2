//! Selector words: a member bitmap indexed by a hash.

use crate::bits::mask128;

/// Members per selector word.
pub const SELECTOR_MEMBERS: u32 = 120;

/// Picks the `hash % popcount`-th live member; `None` for an empty group.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn select_member(word: u128, hash: u64) -> Option<u8> {
    let members = word & mask128(SELECTOR_MEMBERS);
    let live = members.count_ones();
    if live == 0 {
        return None;
    }
    let mut remaining = hash % u64::from(live);
    (0..SELECTOR_MEMBERS)
        .filter(|bit| (members >> bit) & 1 == 1)
        .find(|_| {
            if remaining == 0 {
                true
            } else {
                remaining -= 1;
                false
            }
        })
        .map(|bit| bit as u8)
}

#[cfg(test)]
mod tests {
    use super::select_member;
    use proptest::prelude::*;

    #[test]
    fn empty_group_has_no_member() {
        assert_eq!(select_member(0, 7), None);
        assert_eq!(select_member(1 << 125, 7), None);
    }

    #[test]
    fn picks_nth_live_member() {
        let word = (1 << 3) | (1 << 9) | (1 << 100);
        assert_eq!(select_member(word, 0), Some(3));
        assert_eq!(select_member(word, 1), Some(9));
        assert_eq!(select_member(word, 2), Some(100));
        assert_eq!(select_member(word, 5), Some(100));
    }

    proptest! {
        #[test]
        fn member_is_always_live(word in any::<u128>(), hash in any::<u64>()) {
            if let Some(member) = select_member(word, hash) {
                prop_assert!(member < 120);
                prop_assert_eq!((word >> member) & 1, 1);
            }
        }
    }
}
