//! The immutable work assignment and its binary header codec.
//!
//! A [`Job`] is decoded once from a `mining.notify` notification and never
//! mutated; updates replace the whole value. The header codec assembles the
//! fixed 64-byte work header a worker searches over, deriving the hash
//! field widths from the decoded values rather than hardcoding them.

use std::sync::Arc;

use serde_json::Value;

use crate::pow::PairDigest;

/// Total length of the work header, including the trailing nonce slot.
pub const HEADER_LEN: usize = 64;

/// Byte offset of the timestamp field within the header.
pub const TIMESTAMP_OFFSET: usize = 52;

/// Byte offset of the nonce field within the header.
pub const NONCE_OFFSET: usize = 60;

/// Length of the truncated merkle root embedded in the header.
const MERKLE_ROOT_LEN: usize = 16;

/// Combined length the three hash fields must decode to. The remaining
/// header bytes are fixed-width protocol fields:
/// height (4) + version (2) + merkle root (16) + timestamp (4) +
/// difficulty (4) + nonce (4).
const HASH_FIELDS_LEN: usize = HEADER_LEN - 4 - 2 - MERKLE_ROOT_LEN - 4 - 4 - 4;

/// Errors decoding a job or assembling its header.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The notification params array was shorter than the protocol requires.
    #[error("mining.notify params too short")]
    TooShort,

    /// A field had the wrong JSON type.
    #[error("{0} has wrong type")]
    WrongType(&'static str),

    /// A numeric field was not valid hexadecimal.
    #[error("{0} is not valid hex")]
    BadNumber(&'static str),

    /// A hash field was not valid hexadecimal.
    #[error("{0}: {1}")]
    BadHex(&'static str, hex::FromHexError),

    /// The decoded hash fields do not fill the header exactly.
    #[error("hash fields decode to {got} bytes, expected {expected}")]
    HeaderLength { got: usize, expected: usize },
}

/// One work assignment from the pool.
///
/// Numeric fields arrive as fixed-width big-endian hex strings and are
/// stored as unsigned integers; hash fields are stored as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Pool-assigned job identifier, echoed back on submit.
    pub id: String,

    /// Block height.
    pub height: u32,

    /// Block version.
    pub version: u16,

    /// Previous block hash (truncated by the pool; width derived on decode).
    pub previous_hash: Vec<u8>,

    /// Previous keystone hash.
    pub previous_keystone: Vec<u8>,

    /// Second previous keystone hash.
    pub second_previous_keystone: Vec<u8>,

    /// The three intermediate merkle hashes: proof-of-proof transaction
    /// root, normal transaction root, and metapackage hash.
    pub intermediate_merkles: [Vec<u8>; 3],

    /// Block timestamp from the template.
    pub time: u32,

    /// Encoded difficulty field, carried into the header verbatim.
    pub difficulty: u32,
}

impl Job {
    /// Decode a job from `mining.notify` params.
    ///
    /// Layout: `[job_id, height, version, prev_hash, prev_keystone,
    /// second_prev_keystone, [merkle0, merkle1, merkle2], time, difficulty]`
    /// with all numeric fields hex-encoded. The hash field widths must sum
    /// to exactly the space the header leaves for them; anything else is a
    /// decode error, never a silent truncation.
    pub fn from_notify_params(params: &[Value]) -> Result<Self, JobError> {
        if params.len() < 9 {
            return Err(JobError::TooShort);
        }

        let id = params[0]
            .as_str()
            .ok_or(JobError::WrongType("job_id"))?
            .to_string();

        let height = parse_hex_u32(&params[1], "height")?;
        let version = parse_hex_u16(&params[2], "version")?;

        let previous_hash = parse_hash(&params[3], "prev_hash")?;
        let previous_keystone = parse_hash(&params[4], "prev_keystone")?;
        let second_previous_keystone = parse_hash(&params[5], "second_prev_keystone")?;

        let merkles = params[6]
            .as_array()
            .ok_or(JobError::WrongType("intermediate_merkles"))?;
        if merkles.len() < 3 {
            return Err(JobError::TooShort);
        }
        let intermediate_merkles = [
            parse_hash(&merkles[0], "merkle0")?,
            parse_hash(&merkles[1], "merkle1")?,
            parse_hash(&merkles[2], "merkle2")?,
        ];

        let time = parse_hex_u32(&params[7], "time")?;
        let difficulty = parse_hex_u32(&params[8], "difficulty")?;

        let job = Self {
            id,
            height,
            version,
            previous_hash,
            previous_keystone,
            second_previous_keystone,
            intermediate_merkles,
            time,
            difficulty,
        };
        job.check_hash_widths()?;
        Ok(job)
    }

    /// Compute the truncated merkle root for this job and extraNonce.
    ///
    /// `txRoot = D(merkle0, merkle1)`,
    /// `metapackage = D(merkle2, extraNonce as 8 bytes big-endian)`,
    /// `root = D(metapackage, txRoot)` truncated to its first 16 bytes.
    pub fn merkle_root(&self, extra_nonce: u64, digest: &dyn PairDigest) -> [u8; MERKLE_ROOT_LEN] {
        let tx_root = digest.digest(
            &self.intermediate_merkles[0],
            &self.intermediate_merkles[1],
        );
        let metapackage = digest.digest(&self.intermediate_merkles[2], &extra_nonce.to_be_bytes());
        let root = digest.digest(&metapackage, &tx_root);

        let mut trimmed = [0u8; MERKLE_ROOT_LEN];
        trimmed.copy_from_slice(&root[..MERKLE_ROOT_LEN]);
        trimmed
    }

    /// Assemble the 64-byte work header.
    ///
    /// Field order: height (4, BE), version (2, BE), previous hash,
    /// previous keystone, second previous keystone, merkle root (16),
    /// timestamp (4, BE), difficulty (4, BE), nonce slot (4, zeroed).
    /// Deterministic: identical arguments produce identical bytes.
    pub fn build_header(
        &self,
        timestamp: u32,
        extra_nonce: u64,
        digest: &dyn PairDigest,
    ) -> Result<[u8; HEADER_LEN], JobError> {
        self.check_hash_widths()?;

        let root = self.merkle_root(extra_nonce, digest);

        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.previous_hash);
        buf.extend_from_slice(&self.previous_keystone);
        buf.extend_from_slice(&self.second_previous_keystone);
        buf.extend_from_slice(&root);
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&self.difficulty.to_be_bytes());
        buf.resize(HEADER_LEN, 0);

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf);
        Ok(header)
    }

    fn check_hash_widths(&self) -> Result<(), JobError> {
        let got = self.previous_hash.len()
            + self.previous_keystone.len()
            + self.second_previous_keystone.len();
        if got != HASH_FIELDS_LEN {
            return Err(JobError::HeaderLength {
                got,
                expected: HASH_FIELDS_LEN,
            });
        }
        Ok(())
    }
}

/// Read the timestamp field out of an assembled header.
pub fn header_timestamp(header: &[u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(
        header[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4]
            .try_into()
            .unwrap(),
    )
}

/// Read the nonce field out of an assembled header.
pub fn header_nonce(header: &[u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header[NONCE_OFFSET..NONCE_OFFSET + 4].try_into().unwrap())
}

/// A found solution: the job it solves, the worker's extraNonce, and the
/// header exactly as it hashed below the target.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Snapshot of the job the header was built from.
    pub job: Arc<Job>,

    /// The reporting worker's extraNonce.
    pub extra_nonce: u64,

    /// Copy of the 64-byte header at the moment of acceptance.
    pub header: [u8; HEADER_LEN],
}

fn parse_hex_u32(value: &Value, field: &'static str) -> Result<u32, JobError> {
    let s = value.as_str().ok_or(JobError::WrongType(field))?;
    u32::from_str_radix(s, 16).map_err(|_| JobError::BadNumber(field))
}

fn parse_hex_u16(value: &Value, field: &'static str) -> Result<u16, JobError> {
    let s = value.as_str().ok_or(JobError::WrongType(field))?;
    u16::from_str_radix(s, 16).map_err(|_| JobError::BadNumber(field))
}

fn parse_hash(value: &Value, field: &'static str) -> Result<Vec<u8>, JobError> {
    let s = value.as_str().ok_or(JobError::WrongType(field))?;
    hex::decode(s).map_err(|e| JobError::BadHex(field, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::Sha256Pair;
    use serde_json::json;

    // Golden fields; the merkle hashes are SHA-256 digests of short labels
    // and the expected values below were produced with an independent
    // SHA-256 implementation.
    const MERKLE0: &str = "46fb0cfb98f4b361eff5df83a51999bb95b90a608e99f977dd04ee63da2ef4f5";
    const MERKLE1: &str = "e41ddd81f67b6fc6b9611b6b1ba4c9b476f08fcafef5e6b94402f961a19e5751";
    const MERKLE2: &str = "4a1af415b06552bc4cea4b69ec7fe16bdf222074e1211b6ca77afebcac196234";

    fn sample_params() -> Vec<Value> {
        vec![
            json!("job-1"),
            json!("0012d687"),
            json!("0002"),
            json!("08983e5f73b3f5aca8e8edf7"),
            json!("b18c628b653687b565"),
            json!("2767ccf560fe7f12aa"),
            json!([MERKLE0, MERKLE1, MERKLE2]),
            json!("5f5e1000"),
            json!("1d0fffff"),
        ]
    }

    fn sample_job() -> Job {
        Job::from_notify_params(&sample_params()).unwrap()
    }

    #[test]
    fn test_decode_notify_params() {
        let job = sample_job();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.height, 1_234_567);
        assert_eq!(job.version, 2);
        assert_eq!(job.previous_hash.len(), 12);
        assert_eq!(job.previous_keystone.len(), 9);
        assert_eq!(job.second_previous_keystone.len(), 9);
        assert_eq!(job.time, 1_600_000_000);
        assert_eq!(job.difficulty, 0x1d0fffff);
    }

    #[test]
    fn test_numeric_fields_reencode_to_original_hex() {
        // The pool packs numeric fields as fixed-width big-endian values
        // before hexlifying, so re-encoding must reproduce the wire strings
        // exactly, padding included.
        let job = sample_job();
        assert_eq!(format!("{:08x}", job.height), "0012d687");
        assert_eq!(format!("{:04x}", job.version), "0002");
        assert_eq!(format!("{:08x}", job.time), "5f5e1000");
        assert_eq!(format!("{:08x}", job.difficulty), "1d0fffff");
    }

    #[test]
    fn test_merkle_root_golden_vector() {
        let job = sample_job();
        let root = job.merkle_root(16, &Sha256Pair);
        assert_eq!(hex::encode(root), "7b4e973cf944e5bef6f8ac5e10894189");
    }

    #[test]
    fn test_build_header_golden_vector() {
        let job = sample_job();
        let header = job.build_header(1_600_000_123, 16, &Sha256Pair).unwrap();
        assert_eq!(
            hex::encode(header),
            "0012d687000208983e5f73b3f5aca8e8edf7b18c628b653687b5652767ccf560\
             fe7f12aa7b4e973cf944e5bef6f8ac5e108941895f5e107b1d0fffff00000000"
        );
    }

    #[test]
    fn test_build_header_is_deterministic() {
        let job = sample_job();
        let a = job.build_header(1_600_000_123, 42, &Sha256Pair).unwrap();
        let b = job.build_header(1_600_000_123, 42, &Sha256Pair).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_field_offsets() {
        let job = sample_job();
        let header = job.build_header(1_600_000_123, 16, &Sha256Pair).unwrap();

        assert_eq!(header_timestamp(&header), 1_600_000_123);
        // The nonce slot starts zeroed; workers fill it in place.
        assert_eq!(header_nonce(&header), 0);
        assert_eq!(&header[0..4], &1_234_567u32.to_be_bytes());
    }

    #[test]
    fn test_wrong_hash_width_is_a_decode_error() {
        let mut params = sample_params();
        // An 11-byte previous hash leaves the header one byte short.
        params[3] = json!("08983e5f73b3f5aca8e8ed");
        let err = Job::from_notify_params(&params).unwrap_err();
        assert!(matches!(
            err,
            JobError::HeaderLength {
                got: 29,
                expected: 30
            }
        ));
    }

    #[test]
    fn test_build_header_rejects_bad_widths() {
        let mut job = sample_job();
        job.previous_keystone.push(0xaa);
        assert!(matches!(
            job.build_header(0, 0, &Sha256Pair),
            Err(JobError::HeaderLength { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_params() {
        // Too short
        assert!(matches!(
            Job::from_notify_params(&[json!("job-1")]),
            Err(JobError::TooShort)
        ));

        // Non-hex height
        let mut params = sample_params();
        params[1] = json!("zzzz");
        assert!(matches!(
            Job::from_notify_params(&params),
            Err(JobError::BadNumber("height"))
        ));

        // Merkle list with only two entries
        let mut params = sample_params();
        params[6] = json!([MERKLE0, MERKLE1]);
        assert!(matches!(
            Job::from_notify_params(&params),
            Err(JobError::TooShort)
        ));

        // Numeric field of the wrong JSON type
        let mut params = sample_params();
        params[7] = json!(1600000000);
        assert!(matches!(
            Job::from_notify_params(&params),
            Err(JobError::WrongType("time"))
        ));
    }
}
