//! Packet header vector: containers plus the per-thread predication state
//! carried from stage to stage.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Gress, TABLE_END};

/// Total number of containers.
pub const PHV_WORDS: usize = 224;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_cache_id() -> u64 {
    NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Container width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhvWidth {
    /// 8-bit container.
    W8,
    /// 16-bit container.
    W16,
    /// 32-bit container.
    W32,
}

impl PhvWidth {
    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
        }
    }

    /// Value mask.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::W8 => 0xFF,
            Self::W16 => 0xFFFF,
            Self::W32 => u32::MAX,
        }
    }
}

/// Width of container `word`, `None` past the last container.
#[must_use]
pub const fn phv_word_width(word: usize) -> Option<PhvWidth> {
    match word {
        0..=63 => Some(PhvWidth::W32),
        64..=127 => Some(PhvWidth::W8),
        128..=223 => Some(PhvWidth::W16),
        _ => None,
    }
}

/// Activation state carried between stages for one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PredicationVector {
    /// `stage << 4 | table`, or [`TABLE_END`].
    pub next_table: u8,
    /// Tables of the receiving stage woken unconditionally.
    pub global_exec: u16,
    /// Long-branch tags in flight.
    pub long_branch: u8,
}

impl Default for PredicationVector {
    fn default() -> Self {
        Self {
            next_table: TABLE_END,
            global_exec: 0,
            long_branch: 0,
        }
    }
}

impl PredicationVector {
    /// Vector that starts the chain at `next_table`.
    #[must_use]
    pub const fn starting_at(next_table: u8) -> Self {
        Self {
            next_table,
            global_exec: 0,
            long_branch: 0,
        }
    }
}

/// Per-thread presence, version and predication vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ThreadState {
    /// The thread carries a packet.
    pub present: bool,
    /// Two-bit version matched against exact-entry version masks.
    pub version: u8,
    /// Incoming predication vector.
    pub pred: PredicationVector,
}

/// One packet's header vector.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Phv {
    values: Vec<u32>,
    valid: Vec<bool>,
    threads: [ThreadState; 3],
    drop: bool,
    cache_id: u64,
}

impl Default for Phv {
    fn default() -> Self {
        Self::new()
    }
}

impl Phv {
    /// Empty PHV: every container invalid, no thread present.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: vec![0; PHV_WORDS],
            valid: vec![false; PHV_WORDS],
            threads: [ThreadState::default(); 3],
            drop: false,
            cache_id: fresh_cache_id(),
        }
    }

    /// PHV with one thread present and starting at `next_table`.
    #[must_use]
    pub fn for_thread(gress: Gress, next_table: u8) -> Self {
        let mut phv = Self::new();
        phv.set_present(gress, true);
        phv.set_pred(gress, PredicationVector::starting_at(next_table));
        phv
    }

    /// Identity of the current contents; changes on every mutation.
    #[must_use]
    pub const fn cache_id(&self) -> u64 {
        self.cache_id
    }

    fn touch(&mut self) {
        self.cache_id = fresh_cache_id();
    }

    /// Container value, `None` when invalid or out of range.
    #[must_use]
    pub fn get(&self, word: usize) -> Option<u32> {
        if self.is_valid(word) {
            self.values.get(word).copied()
        } else {
            None
        }
    }

    /// Raw container value regardless of validity.
    #[must_use]
    pub fn raw(&self, word: usize) -> u32 {
        self.values.get(word).copied().unwrap_or(0)
    }

    /// Container validity.
    #[must_use]
    pub fn is_valid(&self, word: usize) -> bool {
        self.valid.get(word).copied().unwrap_or(false)
    }

    /// Writes a container, masking to its width and marking it valid.
    /// Out-of-range containers are ignored.
    pub fn set(&mut self, word: usize, value: u32) {
        let Some(width) = phv_word_width(word) else {
            return;
        };
        if let (Some(slot), Some(valid)) = (self.values.get_mut(word), self.valid.get_mut(word)) {
            *slot = value & width.mask();
            *valid = true;
        }
        self.touch();
    }

    /// Clears a container's valid bit.
    pub fn invalidate(&mut self, word: usize) {
        if let Some(valid) = self.valid.get_mut(word) {
            *valid = false;
        }
        self.touch();
    }

    /// Byte `byte` (little-endian) of container `word`; zero past its width.
    #[must_use]
    pub fn byte(&self, word: usize, byte: u8) -> u8 {
        match phv_word_width(word) {
            Some(width) if byte < width.bytes() => {
                self.raw(word).to_le_bytes()[usize::from(byte)]
            }
            _ => 0,
        }
    }

    /// Thread state.
    #[must_use]
    pub const fn thread(&self, gress: Gress) -> &ThreadState {
        &self.threads[gress.index()]
    }

    /// Marks a thread present or absent.
    pub fn set_present(&mut self, gress: Gress, present: bool) {
        self.threads[gress.index()].present = present;
        self.touch();
    }

    /// Sets a thread's two-bit version.
    pub fn set_version(&mut self, gress: Gress, version: u8) {
        self.threads[gress.index()].version = version & 0x3;
        self.touch();
    }

    /// Predication vector of a thread.
    #[must_use]
    pub const fn pred(&self, gress: Gress) -> PredicationVector {
        self.threads[gress.index()].pred
    }

    /// Replaces a thread's predication vector.
    pub fn set_pred(&mut self, gress: Gress, pred: PredicationVector) {
        self.threads[gress.index()].pred = pred;
        self.touch();
    }

    /// Drop flag set by upstream actions.
    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        self.drop
    }

    /// Sets the drop flag; the packet still flows through every step.
    pub fn set_drop(&mut self, drop: bool) {
        self.drop = drop;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::{phv_word_width, Phv, PhvWidth, PHV_WORDS};
    use crate::{Gress, PredicationVector};

    #[test]
    fn container_widths_follow_layout() {
        assert_eq!(phv_word_width(0), Some(PhvWidth::W32));
        assert_eq!(phv_word_width(64), Some(PhvWidth::W8));
        assert_eq!(phv_word_width(128), Some(PhvWidth::W16));
        assert_eq!(phv_word_width(PHV_WORDS - 1), Some(PhvWidth::W16));
        assert_eq!(phv_word_width(PHV_WORDS), None);
    }

    #[test]
    fn writes_mask_to_width_and_set_valid() {
        let mut phv = Phv::new();
        assert_eq!(phv.get(70), None);
        phv.set(70, 0x1234);
        assert_eq!(phv.get(70), Some(0x34));
        phv.set(130, 0xABCD_EF01);
        assert_eq!(phv.get(130), Some(0xEF01));
        assert_eq!(phv.byte(130, 1), 0xEF);
        assert_eq!(phv.byte(130, 2), 0);
        phv.invalidate(130);
        assert_eq!(phv.get(130), None);
    }

    #[test]
    fn every_mutation_draws_fresh_cache_id() {
        let mut phv = Phv::new();
        let first = phv.cache_id();
        phv.set(0, 1);
        let second = phv.cache_id();
        assert_ne!(first, second);
        phv.set_pred(Gress::Egress, PredicationVector::starting_at(0x12));
        assert_ne!(second, phv.cache_id());
        let copy = phv.clone();
        assert_eq!(copy.cache_id(), phv.cache_id());
    }

    #[test]
    fn thread_helpers() {
        let mut phv = Phv::for_thread(Gress::Ingress, 0x03);
        assert!(phv.thread(Gress::Ingress).present);
        assert!(!phv.thread(Gress::Egress).present);
        assert_eq!(phv.pred(Gress::Ingress).next_table, 0x03);
        phv.set_version(Gress::Ingress, 0x7);
        assert_eq!(phv.thread(Gress::Ingress).version, 0x3);
    }
}
