//! Injected hash capabilities.
//!
//! The miner treats both hash functions it depends on as capabilities
//! supplied by the caller rather than baked-in algorithms:
//!
//! - [`PairDigest`]: the two-input digest used only for merkle-root
//!   computation. The chain defines this as SHA-256 over the
//!   concatenation of both inputs; [`Sha256Pair`] is the production
//!   implementation.
//! - [`PowHash`]: the proof-of-work hash applied to the 64-byte header in
//!   the search loop. The chain's deployed function is a native vBlake
//!   variant distributed separately; [`Sha256Pow`] is the stand-in wired
//!   by default so the binary is self-contained. Tests inject
//!   deterministic fakes.

use sha2::{Digest, Sha256};

use crate::job::HEADER_LEN;

/// Two-input cryptographic digest with a fixed 32-byte output.
///
/// Used exclusively by the merkle-root computation; distinct from the
/// proof-of-work hash.
pub trait PairDigest: Send + Sync {
    /// Digest the concatenation of `first` and `second`.
    fn digest(&self, first: &[u8], second: &[u8]) -> [u8; 32];
}

/// Proof-of-work hash over the fixed-size work header.
///
/// The output length is algorithm-defined; the search loop interprets it
/// as an unsigned big-endian integer for target comparison.
pub trait PowHash: Send + Sync {
    /// Hash one candidate header.
    fn hash(&self, header: &[u8; HEADER_LEN]) -> Vec<u8>;
}

/// SHA-256 over the concatenation of both inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Pair;

impl PairDigest for Sha256Pair {
    fn digest(&self, first: &[u8], second: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(first);
        hasher.update(second);
        hasher.finalize().into()
    }
}

/// Single SHA-256 of the header, as the default proof-of-work stand-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Pow;

impl PowHash for Sha256Pow {
    fn hash(&self, header: &[u8; HEADER_LEN]) -> Vec<u8> {
        Sha256::digest(header).to_vec()
    }
}
