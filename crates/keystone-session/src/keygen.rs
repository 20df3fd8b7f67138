//! Unbiased random draws used by the handshake.
//!
//! All functions take the generator as a parameter so tests can pass a
//! seeded `StdRng`; production code passes `rand::rng()`.

use rand::Rng;

use crate::SessionError;

/// Draws a 32-bit handshake key from two independent draws: 30 high bits
/// and 2 low bits.
pub fn generate_handshake_key<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let high = rng.random::<u32>() >> 2;
    let low = rng.random::<u32>() & 0b11;
    (high << 2) | low
}

/// Uniform draw from `[from, to)`.
///
/// Samples are masked to the smallest power of two covering the range
/// and rejected until one lands inside it, so there is no modulo bias.
///
/// # Errors
/// [`SessionError::InvalidRange`] if `from >= to`.
pub fn random_u32_in_range<R: Rng + ?Sized>(rng: &mut R, from: u32, to: u32) -> Result<u32, SessionError> {
    if from >= to {
        return Err(SessionError::InvalidRange {
            from: i64::from(from),
            to: i64::from(to),
        });
    }
    Ok(from + sample_below(rng, to - from))
}

/// Signed counterpart of [`random_u32_in_range`].
pub fn random_i32_in_range<R: Rng + ?Sized>(rng: &mut R, from: i32, to: i32) -> Result<i32, SessionError> {
    if from >= to {
        return Err(SessionError::InvalidRange {
            from: i64::from(from),
            to: i64::from(to),
        });
    }
    // The span of any non-empty i32 range fits in a u32.
    let span = (i64::from(to) - i64::from(from)) as u32;
    let offset = i64::from(sample_below(rng, span));
    Ok((i64::from(from) + offset) as i32)
}

/// Returns `true` with probability `percent / 100`.
pub fn percentage_check<R: Rng + ?Sized>(rng: &mut R, percent: u32) -> bool {
    1 + sample_below(rng, 100) <= percent
}

/// Uniform value in `[0, span)`. `span` must be non-zero.
fn sample_below<R: Rng + ?Sized>(rng: &mut R, span: u32) -> u32 {
    let max = span - 1;
    let mask = if max == 0 { 0 } else { u32::MAX >> max.leading_zeros() };
    loop {
        let sample = rng.random::<u32>() & mask;
        if sample <= max {
            return sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_random_u32_in_range_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let v = random_u32_in_range(&mut rng, 10, 17).unwrap();
            assert!((10..17).contains(&v));
        }
    }

    #[test]
    fn test_random_u32_in_range_covers_every_value() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut hits = [0u32; 5];
        for _ in 0..5_000 {
            hits[random_u32_in_range(&mut rng, 0, 5).unwrap() as usize] += 1;
        }
        // Roughly 1000 each; a biased sampler would skew badly.
        assert!(hits.iter().all(|&h| (800..1200).contains(&h)), "{hits:?}");
    }

    #[test]
    fn test_random_u32_in_range_empty_range_returns_error() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            random_u32_in_range(&mut rng, 5, 5),
            Err(SessionError::InvalidRange { from: 5, to: 5 })
        );
        assert!(random_i32_in_range(&mut rng, 3, -3).is_err());
    }

    #[test]
    fn test_random_u32_in_range_single_value() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(random_u32_in_range(&mut rng, 41, 42), Ok(41));
    }

    #[test]
    fn test_random_i32_in_range_handles_full_negative_span() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            let v = random_i32_in_range(&mut rng, i32::MIN, i32::MAX).unwrap();
            assert!(v < i32::MAX);
        }
        for _ in 0..1_000 {
            let v = random_i32_in_range(&mut rng, -5, 5).unwrap();
            assert!((-5..5).contains(&v));
        }
    }

    #[test]
    fn test_percentage_check_extremes() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1_000 {
            assert!(!percentage_check(&mut rng, 0));
            assert!(percentage_check(&mut rng, 100));
        }
    }

    #[test]
    fn test_generate_handshake_key_is_deterministic_per_seed() {
        let a = generate_handshake_key(&mut StdRng::seed_from_u64(42));
        let b = generate_handshake_key(&mut StdRng::seed_from_u64(42));
        let c = generate_handshake_key(&mut StdRng::seed_from_u64(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
