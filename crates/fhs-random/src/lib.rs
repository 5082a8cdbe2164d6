#![forbid(unsafe_code)]

//! Deterministic randomness and the choice primitives every strategy draws
//! through.
//!
//! All generation in this workspace consumes a [`Draw`] implementation. The
//! provided [`DeterministicRng`] is a counter-based splitmix stream, so a
//! `(seed, counter)` pair fully identifies any point in a generation run.

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;
pub const DEFAULT_RNG_SEED: u64 = 0xC0DE_CAFE_F00D_BAAD;

/// Probability (out of 16) that a float draw lands on a boundary or
/// special value instead of the uniform interior.
const FLOAT_EDGE_CASE_ODDS: u64 = 2;

pub const RANDOM_REASON_CODES: [&str; 3] = [
    "random_upper_bound_rejected",
    "random_empty_range_rejected",
    "random_empty_choice_rejected",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RandomError {
    InvalidUpperBound,
    EmptyRange { min: f64, max: f64 },
    EmptyChoice,
}

impl RandomError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidUpperBound => "random_upper_bound_rejected",
            Self::EmptyRange { .. } => "random_empty_range_rejected",
            Self::EmptyChoice => "random_empty_choice_rejected",
        }
    }
}

impl std::fmt::Display for RandomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUpperBound => write!(f, "upper_bound must be > 0"),
            Self::EmptyRange { min, max } => write!(f, "range [{min}, {max}] is empty"),
            Self::EmptyChoice => write!(f, "cannot choose from an empty collection"),
        }
    }
}

impl std::error::Error for RandomError {}

/// Bit width at which a float element is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    W32,
    W64,
}

impl FloatWidth {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }

    #[must_use]
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::W32 => f64::from(value as f32),
            Self::W64 => value,
        }
    }
}

/// The deterministic choice primitive consumed by every strategy.
///
/// Implementors only supply [`Draw::next_u64`]; the combinators are derived
/// from it so that replaying the same word stream replays the same values.
pub trait Draw {
    fn next_u64(&mut self) -> u64;

    /// Uniform in `[0, 1)` with 53 bits of mantissa.
    fn next_f64(&mut self) -> f64 {
        let sample = self.next_u64() >> 11;
        sample as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `[0, upper_bound)`, rejection-sampled to avoid modulo bias.
    fn bounded_u64(&mut self, upper_bound: u64) -> Result<u64, RandomError> {
        if upper_bound == 0 {
            return Err(RandomError::InvalidUpperBound);
        }

        let threshold = u64::MAX - u64::MAX % upper_bound;

        loop {
            let candidate = self.next_u64();
            if candidate < threshold {
                return Ok(candidate % upper_bound);
            }
        }
    }

    /// Uniform integer in the inclusive range `[min, max]`.
    fn integers(&mut self, min: i64, max: i64) -> Result<i64, RandomError> {
        if min > max {
            return Err(RandomError::EmptyRange {
                min: min as f64,
                max: max as f64,
            });
        }
        let span = max.wrapping_sub(min) as u64;
        let offset = if span == u64::MAX {
            self.next_u64()
        } else {
            self.bounded_u64(span + 1)?
        };
        Ok(min.wrapping_add(offset as i64))
    }

    /// Uniform `usize` in the inclusive range `[min, max]`.
    fn sizes(&mut self, min: usize, max: usize) -> Result<usize, RandomError> {
        if min > max {
            return Err(RandomError::EmptyRange {
                min: min as f64,
                max: max as f64,
            });
        }
        let offset = self.bounded_u64((max - min) as u64 + 1)?;
        Ok(min + offset as usize)
    }

    fn boolean(&mut self) -> bool {
        self.next_u64() >> 63 == 1
    }

    /// Finite float in `[min, max]` rounded to `width`.
    ///
    /// Biased toward the bounds, zero and unit magnitudes the way
    /// property-testing float strategies are; never NaN or infinite.
    fn floats(&mut self, min: f64, max: f64, width: FloatWidth) -> Result<f64, RandomError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(RandomError::EmptyRange { min, max });
        }
        let value = if self.bounded_u64(16)? < FLOAT_EDGE_CASE_ODDS {
            let specials = [min, max, 0.0, -0.0, 1.0, -1.0, 0.5, -0.5];
            let pick = specials[self.bounded_u64(specials.len() as u64)? as usize];
            if pick < min || pick > max { min } else { pick }
        } else {
            (max - min).mul_add(self.next_f64(), min)
        };
        Ok(width.round(value).clamp(width.round(min), width.round(max)))
    }
}

/// Picks one element uniformly.
pub fn sampled_from<'a, T, D: Draw + ?Sized>(
    draw: &mut D,
    items: &'a [T],
) -> Result<&'a T, RandomError> {
    if items.is_empty() {
        return Err(RandomError::EmptyChoice);
    }
    let idx = draw.bounded_u64(items.len() as u64)? as usize;
    Ok(&items[idx])
}

/// A uniformly random permutation (Fisher-Yates).
pub fn permutation<T: Clone, D: Draw + ?Sized>(
    draw: &mut D,
    items: &[T],
) -> Result<Vec<T>, RandomError> {
    let mut out = items.to_vec();
    for i in (1..out.len()).rev() {
        let j = draw.bounded_u64(i as u64 + 1)? as usize;
        out.swap(i, j);
    }
    Ok(out)
}

/// Draws between `min_size` and `max_size` elements with `element`.
pub fn lists<T, D, F>(
    draw: &mut D,
    min_size: usize,
    max_size: usize,
    mut element: F,
) -> Result<Vec<T>, RandomError>
where
    D: Draw + ?Sized,
    F: FnMut(&mut D) -> Result<T, RandomError>,
{
    let len = draw.sizes(min_size, max_size)?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(element(draw)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    /// Number of words drawn so far.
    #[must_use]
    pub const fn draws(self) -> u64 {
        self.counter
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(DEFAULT_RNG_SEED)
    }
}

impl Draw for DeterministicRng {
    fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }
}

/// Independent child seed for stream `stream` of `base`.
#[must_use]
pub fn derive_seed(base: u64, stream: u64) -> u64 {
    splitmix64(base ^ splitmix64(stream.wrapping_add(GOLDEN_GAMMA)))
}

/// Seed derived from a stable label, e.g. a property name.
#[must_use]
pub fn seed_from_label(label: &str) -> u64 {
    label.bytes().fold(DEFAULT_RNG_SEED, |acc, byte| {
        splitmix64(acc ^ u64::from(byte))
    })
}

fn splitmix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(MIX_CONST1);
    x ^= x >> 27;
    x = x.wrapping_mul(MIX_CONST2);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_RNG_SEED, DeterministicRng, Draw, FloatWidth, RANDOM_REASON_CODES, RandomError,
        derive_seed, lists, permutation, sampled_from, seed_from_label,
    };

    #[test]
    fn reason_code_registry_is_stable() {
        assert_eq!(
            RANDOM_REASON_CODES,
            [
                "random_upper_bound_rejected",
                "random_empty_range_rejected",
                "random_empty_choice_rejected",
            ]
        );
        assert_eq!(
            RandomError::InvalidUpperBound.reason_code(),
            RANDOM_REASON_CODES[0]
        );
    }

    #[test]
    fn same_seed_replays_same_stream() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);
        for _ in 0..128 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert_eq!(a.draws(), 128);
        assert_eq!(
            DeterministicRng::default(),
            DeterministicRng::new(DEFAULT_RNG_SEED)
        );
    }

    #[test]
    fn bounded_and_ranged_draws_stay_in_bounds() {
        let mut rng = DeterministicRng::new(11);
        assert_eq!(rng.bounded_u64(0), Err(RandomError::InvalidUpperBound));
        for _ in 0..512 {
            let v = rng.integers(-3, 4).expect("range");
            assert!((-3..=4).contains(&v));
            let s = rng.sizes(2, 6).expect("sizes");
            assert!((2..=6).contains(&s));
        }
        assert_eq!(rng.integers(5, 5).expect("degenerate"), 5);
        assert!(rng.integers(i64::MIN, i64::MAX).is_ok());
        assert!(matches!(
            rng.integers(1, 0),
            Err(RandomError::EmptyRange { .. })
        ));
    }

    #[test]
    fn floats_are_finite_bounded_and_width_rounded() {
        let mut rng = DeterministicRng::new(3);
        let mut saw_bound = false;
        for _ in 0..2000 {
            let v = rng.floats(-200.0, 200.0, FloatWidth::W32).expect("float");
            assert!(v.is_finite());
            assert!((-200.0..=200.0).contains(&v));
            assert_eq!(v, f64::from(v as f32));
            saw_bound |= v == 200.0 || v == -200.0;
        }
        assert!(saw_bound, "edge-case bias should hit a bound");
        assert!(rng.floats(1.0, 0.0, FloatWidth::W64).is_err());
        assert!(rng.floats(f64::NEG_INFINITY, 0.0, FloatWidth::W64).is_err());
        assert_eq!(FloatWidth::from_bits(32), Some(FloatWidth::W32));
        assert_eq!(FloatWidth::from_bits(16), None);
    }

    #[test]
    fn booleans_take_both_values() {
        let mut rng = DeterministicRng::new(5);
        let trues = (0..256).filter(|_| rng.boolean()).count();
        assert!(trues > 64 && trues < 192, "trues={trues}");
    }

    #[test]
    fn choice_helpers() {
        let mut rng = DeterministicRng::new(9);
        let items = ["a", "b", "c", "d"];
        for _ in 0..64 {
            assert!(items.contains(sampled_from(&mut rng, &items).expect("choice")));
        }
        let empty: [u8; 0] = [];
        assert_eq!(
            sampled_from(&mut rng, &empty),
            Err(RandomError::EmptyChoice)
        );

        let mut shuffled = permutation(&mut rng, &items).expect("permutation");
        shuffled.sort_unstable();
        assert_eq!(shuffled, items);

        let drawn = lists(&mut rng, 0, 3, |d| d.integers(0, 9)).expect("list");
        assert!(drawn.len() <= 3);
    }

    #[test]
    fn seed_derivation_separates_streams() {
        assert_ne!(derive_seed(1, 0), derive_seed(1, 1));
        assert_eq!(derive_seed(42, 3), derive_seed(42, 3));
        assert_eq!(seed_from_label("prop"), seed_from_label("prop"));
        assert_ne!(seed_from_label("prop_a"), seed_from_label("prop_b"));
    }
}
