//! Blake3 proof of work and hierarchical order
//!
//! ```text
//!   seal_hash = BLAKE3(parent hashes, numbers, difficulty, time, location)
//!   mix       = BLAKE3(seal_hash || nonce)
//!   hash      = BLAKE3(mix)
//! ```
//!
//! The zone target is `2^256 / difficulty`. Each coarser context requires a
//! target [`ORDER_FACTOR`] times smaller, so a hash below the prime target is
//! reported to every level of the slice.

use crate::EngineError;
use alloy_primitives::{B256, U256};
use blake3::Hasher as Blake3;
use quai_primitives::{Context, Header};

/// Target reduction between one context and the next coarser one.
pub const ORDER_FACTOR: u64 = 3;

/// Hash result for a single nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    /// The final proof-of-work hash
    pub hash: B256,
    /// Mix digest carried in the sealed header
    pub mix_digest: B256,
}

/// Hash of every header field covered by the seal (all but nonce and mix).
pub fn seal_hash(header: &Header) -> B256 {
    let mut hasher = Blake3::new();
    for ctx in Context::ALL {
        hasher.update(header.parent_hash[ctx.index()].as_slice());
        hasher.update(&header.number(ctx).to_be_bytes());
    }
    hasher.update(&header.difficulty.to_be_bytes::<32>());
    hasher.update(&header.time.to_be_bytes());
    hasher.update(&[header.location.region, header.location.zone]);
    B256::from(*hasher.finalize().as_bytes())
}

/// Proof-of-work hash of `seal_hash` with `nonce`.
pub fn pow_hash(seal_hash: &B256, nonce: u64) -> HashResult {
    let mut hasher = Blake3::new();
    hasher.update(seal_hash.as_slice());
    hasher.update(&nonce.to_be_bytes());
    let mix_digest = B256::from(*hasher.finalize().as_bytes());

    let hash = B256::from(*blake3::hash(mix_digest.as_slice()).as_bytes());
    HashResult { hash, mix_digest }
}

/// Convert difficulty to the zone target.
pub fn difficulty_to_target(difficulty: U256) -> U256 {
    if difficulty.is_zero() {
        return U256::MAX;
    }
    U256::MAX / difficulty
}

/// Targets for each context, coarsest first.
pub fn context_targets(difficulty: U256) -> [U256; 3] {
    let step = U256::from(ORDER_FACTOR);
    let zone = difficulty_to_target(difficulty);
    let region = zone / step;
    [region / step, region, zone]
}

/// Order of a hash: the coarsest context whose target it meets.
pub fn order_of(hash: &B256, difficulty: U256) -> Option<Context> {
    let value = U256::from_be_bytes(hash.0);
    let targets = context_targets(difficulty);
    Context::ALL.into_iter().find(|ctx| value <= targets[ctx.index()])
}

/// Verify the seal of `header` and compute its order.
///
/// Returns the proof-of-work hash together with the order.
pub fn calc_order(header: &Header) -> Result<(B256, Context), EngineError> {
    if header.difficulty.is_zero() {
        return Err(EngineError::ZeroDifficulty);
    }

    let result = pow_hash(&seal_hash(header), header.nonce_u64());
    if result.mix_digest != header.mix_hash {
        return Err(EngineError::MixDigestMismatch {
            expected: result.mix_digest,
            actual: header.mix_hash,
        });
    }

    let order = order_of(&result.hash, header.difficulty).ok_or(EngineError::InsufficientWork)?;
    Ok((result.hash, order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quai_primitives::Location;

    fn header(difficulty: u64) -> Header {
        Header::new([1, 2, 3], U256::from(difficulty), Location::new(0, 1).unwrap())
    }

    fn sealed(mut header: Header, nonce: u64) -> Header {
        let result = pow_hash(&seal_hash(&header), nonce);
        header.seal(nonce, result.mix_digest);
        header
    }

    #[test]
    fn seal_hash_ignores_nonce() {
        let a = header(10);
        let b = sealed(a.clone(), 42);
        assert_eq!(seal_hash(&a), seal_hash(&b));

        let mut c = a.clone();
        c.time = 1;
        assert_ne!(seal_hash(&a), seal_hash(&c));
    }

    #[test]
    fn targets_shrink_toward_prime() {
        let [prime, region, zone] = context_targets(U256::from(1000u64));
        assert!(prime < region);
        assert!(region < zone);
        assert_eq!(zone, U256::MAX / U256::from(1000u64));
    }

    #[test]
    fn every_order_is_reachable_at_difficulty_one() {
        // Difficulty one accepts any hash at Zone; coarser orders show up
        // with probability 1/3 and 1/9 per nonce.
        let base = header(1);
        let mut seen = [false; 3];
        for nonce in 0..2_000u64 {
            let (_, order) = calc_order(&sealed(base.clone(), nonce)).unwrap();
            seen[order.index()] = true;
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn rejects_bad_mix_digest() {
        let mut header = sealed(header(1), 7);
        header.mix_hash = B256::ZERO;
        assert_matches!(calc_order(&header), Err(EngineError::MixDigestMismatch { .. }));
    }

    #[test]
    fn rejects_insufficient_work() {
        // At maximum difficulty virtually no hash meets the zone target.
        let mut base = header(1);
        base.difficulty = U256::MAX;
        let header = sealed(base, 7);
        assert_matches!(calc_order(&header), Err(EngineError::InsufficientWork));
    }

    #[test]
    fn rejects_zero_difficulty() {
        assert_matches!(calc_order(&header(0)), Err(EngineError::ZeroDifficulty));
    }
}
