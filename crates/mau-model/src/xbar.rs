//! Input crossbar: selects PHV bytes into the exact and ternary match buses.

use log::warn;

use crate::{
    phv_word_width, Gress, MauDiag, MauError, Phv, SimulationConfig, PHV_WORDS,
};

/// Bytes on the exact-match bus (1024 bits, the hash input).
pub const EXACT_XBAR_BYTES: usize = 128;
/// Bytes on the ternary-match bus (twelve 44-bit TCAM slices).
pub const TERNARY_XBAR_BYTES: usize = 66;

/// What drives one crossbar output byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum XbarSource {
    /// No source; the byte is `(0, invalid)`.
    #[default]
    Disabled,
    /// One byte of a container.
    PhvByte {
        /// Container index.
        word: u8,
        /// Byte within the container, little-endian.
        byte: u8,
    },
    /// Valid bits of eight consecutive containers starting at `first_word`.
    /// A container owned by another thread contributes a zero bit.
    ValidBits {
        /// First container.
        first_word: u8,
    },
    /// The thread's two-bit version. Belongs to the thread rather than a
    /// container, so container ownership does not apply.
    Version,
}

/// Selection for one output byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct XbarByteConfig {
    /// Byte source.
    pub source: XbarSource,
    /// Thread the byte belongs to.
    pub gress: Gress,
}

impl XbarByteConfig {
    /// Byte selecting `byte` of container `word` for `gress`.
    #[must_use]
    pub const fn phv(word: u8, byte: u8, gress: Gress) -> Self {
        Self {
            source: XbarSource::PhvByte { word, byte },
            gress,
        }
    }
}

/// Crossbar configuration of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct XbarConfig {
    /// Exact bus selections.
    pub exact: Vec<XbarByteConfig>,
    /// Ternary bus selections, before swizzle.
    pub ternary: Vec<XbarByteConfig>,
    /// `swizzle[i]` is the pre-swizzle ternary byte that lands at position `i`.
    pub swizzle: Vec<u8>,
    /// Owning thread of each container.
    pub phv_thread: Vec<Gress>,
}

impl Default for XbarConfig {
    fn default() -> Self {
        Self {
            exact: vec![XbarByteConfig::default(); EXACT_XBAR_BYTES],
            ternary: vec![XbarByteConfig::default(); TERNARY_XBAR_BYTES],
            swizzle: (0..TERNARY_XBAR_BYTES)
                .map(|index| u8::try_from(index).unwrap_or(0))
                .collect(),
            phv_thread: vec![Gress::Ingress; PHV_WORDS],
        }
    }
}

impl XbarConfig {
    /// Checks vector shapes and the swizzle range.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] on a malformed vector or swizzle entry.
    pub fn validate(&self) -> Result<(), MauError> {
        let shapes = [
            ("exact xbar", self.exact.len(), EXACT_XBAR_BYTES),
            ("ternary xbar", self.ternary.len(), TERNARY_XBAR_BYTES),
            ("swizzle", self.swizzle.len(), TERNARY_XBAR_BYTES),
            ("phv thread", self.phv_thread.len(), PHV_WORDS),
        ];
        for (what, len, expected) in shapes {
            if len != expected {
                return Err(MauError::OutOfRange { what, index: len });
            }
        }
        if let Some(bad) = self
            .swizzle
            .iter()
            .find(|source| usize::from(**source) >= TERNARY_XBAR_BYTES)
        {
            return Err(MauError::OutOfRange {
                what: "swizzle",
                index: usize::from(*bad),
            });
        }
        Ok(())
    }
}

/// Both match buses with per-byte validity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MatchInput {
    /// Exact bus bytes.
    pub exact: Vec<u8>,
    /// Exact byte validity.
    pub exact_valid: Vec<bool>,
    /// Ternary bus bytes, after swizzle.
    pub ternary: Vec<u8>,
    /// Ternary byte validity, after swizzle.
    pub ternary_valid: Vec<bool>,
}

impl Default for MatchInput {
    fn default() -> Self {
        Self {
            exact: vec![0; EXACT_XBAR_BYTES],
            exact_valid: vec![false; EXACT_XBAR_BYTES],
            ternary: vec![0; TERNARY_XBAR_BYTES],
            ternary_valid: vec![false; TERNARY_XBAR_BYTES],
        }
    }
}

impl MatchInput {
    /// Exact byte, zero when invalid.
    #[must_use]
    pub fn exact_byte(&self, byte: usize) -> u8 {
        if self.exact_valid.get(byte).copied().unwrap_or(false) {
            self.exact.get(byte).copied().unwrap_or(0)
        } else {
            0
        }
    }

    /// `width` bits (at most 64) of the ternary bus starting at bit `lsb`.
    /// Bits of invalid bytes read as zero.
    #[must_use]
    pub fn ternary_bits(&self, lsb: usize, width: usize) -> u64 {
        let mut out = 0u64;
        for offset in 0..width.min(64) {
            let bit = lsb + offset;
            let byte = bit / 8;
            let valid = self.ternary_valid.get(byte).copied().unwrap_or(false);
            let value = self.ternary.get(byte).copied().unwrap_or(0);
            if valid && (value >> (bit % 8)) & 1 == 1 {
                out |= 1 << offset;
            }
        }
        out
    }
}

/// Stateful crossbar: configuration is read per call, the last result is cached.
#[derive(Debug, Clone, Default)]
pub struct InputXbar {
    cache: Option<(u64, u64, MatchInput)>,
}

impl InputXbar {
    /// Creates an empty crossbar.
    #[must_use]
    pub const fn new() -> Self {
        Self { cache: None }
    }

    /// Drops the cached result.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Builds both match buses for `phv`.
    ///
    /// The result is reused while neither the PHV contents nor the
    /// configuration generation changed.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::XbarGressMismatch`] when a byte selects a container
    /// owned by another thread and the relaxed check is off.
    pub fn calculate(
        &mut self,
        config: &XbarConfig,
        phv: &Phv,
        generation: u64,
        sim: &SimulationConfig,
        diag: &mut MauDiag,
    ) -> Result<MatchInput, MauError> {
        if let Some((cache_id, cached_generation, input)) = &self.cache {
            if *cache_id == phv.cache_id() && *cached_generation == generation {
                return Ok(input.clone());
            }
        }

        let mut input = MatchInput::default();
        for (index, byte) in config.exact.iter().enumerate().take(EXACT_XBAR_BYTES) {
            let (value, valid) = select_byte(config, byte, phv, index, sim, diag)?;
            input.exact[index] = value;
            input.exact_valid[index] = valid;
        }

        let mut raw = [(0u8, false); TERNARY_XBAR_BYTES];
        for (index, byte) in config.ternary.iter().enumerate().take(TERNARY_XBAR_BYTES) {
            raw[index] = select_byte(config, byte, phv, EXACT_XBAR_BYTES + index, sim, diag)?;
        }
        for (index, source) in config.swizzle.iter().enumerate().take(TERNARY_XBAR_BYTES) {
            let (value, valid) = raw
                .get(usize::from(*source))
                .copied()
                .unwrap_or((0, false));
            input.ternary[index] = value;
            input.ternary_valid[index] = valid;
        }

        self.cache = Some((phv.cache_id(), generation, input.clone()));
        Ok(input)
    }
}

fn select_byte(
    config: &XbarConfig,
    byte: &XbarByteConfig,
    phv: &Phv,
    position: usize,
    sim: &SimulationConfig,
    diag: &mut MauDiag,
) -> Result<(u8, bool), MauError> {
    if !phv.thread(byte.gress).present {
        return Ok((0, false));
    }
    match byte.source {
        XbarSource::Disabled => Ok((0, false)),
        XbarSource::PhvByte { word, byte: lane } => {
            let container = usize::from(word);
            if phv_word_width(container).is_none()
                || !owned_by(config, byte.gress, word, position, sim, diag)?
            {
                return Ok((0, false));
            }
            if phv.is_valid(container) {
                Ok((phv.byte(container, lane), true))
            } else {
                Ok((0, false))
            }
        }
        XbarSource::ValidBits { first_word } => {
            let mut bits = 0u8;
            for offset in 0..8u8 {
                let Some(word) = first_word.checked_add(offset) else {
                    break;
                };
                let container = usize::from(word);
                if phv_word_width(container).is_none()
                    || !owned_by(config, byte.gress, word, position, sim, diag)?
                {
                    continue;
                }
                if phv.is_valid(container) {
                    bits |= 1 << offset;
                }
            }
            Ok((bits, true))
        }
        XbarSource::Version => Ok((phv.thread(byte.gress).version, true)),
    }
}

/// Container `word` belongs to `gress`. A foreign container is an error, or
/// with the relaxed check a counted mismatch the caller reads as invalid.
fn owned_by(
    config: &XbarConfig,
    gress: Gress,
    word: u8,
    position: usize,
    sim: &SimulationConfig,
    diag: &mut MauDiag,
) -> Result<bool, MauError> {
    let owner = config
        .phv_thread
        .get(usize::from(word))
        .copied()
        .unwrap_or_default();
    if owner == gress {
        return Ok(true);
    }
    let error = MauError::XbarGressMismatch {
        byte: u16::try_from(position).unwrap_or(u16::MAX),
        word,
        owner,
        gress,
    };
    if !sim.relax_xbar_gress_check {
        return Err(error);
    }
    warn!("{error}; container ignored");
    diag.stage.gress_mismatches = diag.stage.gress_mismatches.saturating_add(1);
    Ok(false)
}
