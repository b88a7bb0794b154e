//! Mergeable Bloom-filter digests of thread identities.
//!
//! A [`ProbabilisticSet`] holds `u64` digest values. Membership is one-sided:
//! [`ProbabilisticSet::contains`] never misses a value that was inserted (or
//! merged in through [`ProbabilisticSet::union_in_place`]), but may report a
//! value that never was, at roughly the false-positive rate configured in
//! [`DigestParams`].
//!
//! Sets only grow. There is no removal; a set is "reset" by replacing it with
//! a fresh one.

use std::error::Error;
use std::fmt;

use facet::Facet;
use xxhash_rust::xxh3::xxh3_64_with_seed;

pub const DEFAULT_FALSE_POSITIVE_PROBABILITY: f64 = 1e-4;
pub const DEFAULT_PROJECTED_ELEMENT_COUNT: u64 = 32;
/// Largest bit array a [`DigestParams`] may ask for (128 KiB per set).
pub const MAX_DIGEST_BITS: u64 = 1 << 20;

const WORD_BITS: u64 = u64::BITS as u64;

/// Construction parameters for a [`ProbabilisticSet`].
#[derive(Facet, Debug, Clone, Copy, PartialEq)]
pub struct DigestParams {
    /// Target false-positive probability once `projected_element_count` values are inserted.
    pub false_positive_probability: f64,
    /// Number of distinct values the set is sized for (roughly, threads per protection domain).
    pub projected_element_count: u64,
}

impl Default for DigestParams {
    fn default() -> Self {
        Self {
            false_positive_probability: DEFAULT_FALSE_POSITIVE_PROBABILITY,
            projected_element_count: DEFAULT_PROJECTED_ELEMENT_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidDigestParams {
    FalsePositiveProbability(f64),
    ZeroElementCount,
    /// The parameters need more than [`MAX_DIGEST_BITS`] bits.
    TooLarge { bits: f64 },
}

impl fmt::Display for InvalidDigestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FalsePositiveProbability(p) => {
                write!(f, "false_positive_probability must be in (0, 1), got {p}")
            }
            Self::ZeroElementCount => write!(f, "projected_element_count must be non-zero"),
            Self::TooLarge { bits } => write!(
                f,
                "digest would need {bits:.0} bits, more than the {MAX_DIGEST_BITS} allowed"
            ),
        }
    }
}

impl Error for InvalidDigestParams {}

impl DigestParams {
    pub fn new(
        false_positive_probability: f64,
        projected_element_count: u64,
    ) -> Result<Self, InvalidDigestParams> {
        let params = Self {
            false_positive_probability,
            projected_element_count,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), InvalidDigestParams> {
        let p = self.false_positive_probability;
        if !p.is_finite() || p <= 0.0 || p >= 1.0 {
            return Err(InvalidDigestParams::FalsePositiveProbability(p));
        }
        if self.projected_element_count == 0 {
            return Err(InvalidDigestParams::ZeroElementCount);
        }
        let bits = self.optimal_bits();
        if bits > MAX_DIGEST_BITS as f64 {
            return Err(InvalidDigestParams::TooLarge { bits });
        }
        Ok(())
    }

    /// Optimal bit count and hash count for these parameters.
    ///
    /// Validated parameters map to their exact optimal shape. Anything else
    /// is clamped into `1..=MAX_DIGEST_BITS` bits so the shape stays usable.
    pub fn shape(&self) -> DigestShape {
        let n = self.projected_element_count.max(1) as f64;
        let bits = self
            .optimal_bits()
            .min(MAX_DIGEST_BITS as f64)
            .max(1.0) as u64;
        let hashes = ((bits as f64 / n) * std::f64::consts::LN_2).ceil().max(1.0) as u32;
        DigestShape { bits, hashes }
    }

    /// `ceil(-n ln p / ln2^2)`, before any range check. May be infinite or NaN.
    fn optimal_bits(&self) -> f64 {
        let n = self.projected_element_count.max(1) as f64;
        let p = self.false_positive_probability;
        (-n * p.ln() / std::f64::consts::LN_2.powi(2)).ceil()
    }
}

/// Derived bit-array layout of a [`ProbabilisticSet`]. Two sets can only be
/// merged when their shapes are equal.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DigestShape {
    /// Total number of bits (`m`).
    pub bits: u64,
    /// Number of hash functions (`k`).
    pub hashes: u32,
}

impl DigestShape {
    fn words(&self) -> usize {
        self.bits.div_ceil(WORD_BITS) as usize
    }
}

impl From<DigestParams> for DigestShape {
    fn from(params: DigestParams) -> Self {
        params.shape()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProbabilisticSet {
    shape: DigestShape,
    words: Vec<u64>,
    populated: bool,
}

impl ProbabilisticSet {
    pub fn new(shape: DigestShape) -> Self {
        Self {
            shape,
            words: vec![0; shape.words()],
            populated: false,
        }
    }

    /// A set containing exactly `value`.
    pub fn seeded(shape: DigestShape, value: u64) -> Self {
        let mut set = Self::new(shape);
        set.insert(value);
        set
    }

    pub fn shape(&self) -> DigestShape {
        self.shape
    }

    pub fn insert(&mut self, value: u64) {
        let key = value.to_le_bytes();
        for seed in 0..self.shape.hashes {
            let bit = xxh3_64_with_seed(&key, seed as u64) % self.shape.bits;
            self.words[(bit / WORD_BITS) as usize] |= 1 << (bit % WORD_BITS);
        }
        self.populated = true;
    }

    pub fn contains(&self, value: u64) -> bool {
        if !self.populated {
            return false;
        }
        let key = value.to_le_bytes();
        (0..self.shape.hashes).all(|seed| {
            let bit = xxh3_64_with_seed(&key, seed as u64) % self.shape.bits;
            self.words[(bit / WORD_BITS) as usize] & (1 << (bit % WORD_BITS)) != 0
        })
    }

    /// Merges `other` into `self`. Never clears a bit.
    ///
    /// # Panics
    ///
    /// If the two sets were built with different shapes.
    pub fn union_in_place(&mut self, other: &ProbabilisticSet) {
        assert_eq!(
            self.shape, other.shape,
            "invariant violated: cannot union digests of different shapes"
        );
        if !other.populated {
            return;
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
        self.populated = true;
    }

    /// True only if nothing was ever inserted or merged in.
    pub fn is_empty(&self) -> bool {
        !self.populated
    }

    /// Number of set bits. Saturation indicator for diagnostics.
    pub fn bits_set(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }
}

impl fmt::Debug for ProbabilisticSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbabilisticSet")
            .field("bits", &self.shape.bits)
            .field("hashes", &self.shape.hashes)
            .field("bits_set", &self.bits_set())
            .field("populated", &self.populated)
            .finish()
    }
}
