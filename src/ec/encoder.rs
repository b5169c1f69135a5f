//! Erasure Coder
//!
//! Reed-Solomon split/encode/verify/reconstruct/join over a fixed
//! `data_shards + parity_shards` layout, using the `reed-solomon-erasure` crate.
//!
//! Shard index identity is fixed for an object's lifetime: index `i` of a
//! shard set is always written to and read from connection slot `i`.

use crate::ec::join::JoinReader;
use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Upper bound on total shards for GF(2^8) codes
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Outcome of the read-path decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStatus {
    /// First verification passed, no reconstruction ran
    pub all_good: bool,
    /// Reconstruction ran and the result re-verified
    pub reconstructed: bool,
}

// =============================================================================
// Erasure Coder
// =============================================================================

/// Erasure coder for one `k + m` configuration.
///
/// Cheap to clone; the codec tables are shared.
#[derive(Clone)]
pub struct ErasureCoder {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl std::fmt::Debug for ErasureCoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureCoder")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl ErasureCoder {
    /// Create a new coder with the specified k+m configuration
    ///
    /// # Arguments
    /// * `data_shards` - Number of data shards (k)
    /// * `parity_shards` - Number of parity shards (m)
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "data_shards must be greater than 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "parity_shards must be greater than 0".to_string(),
            ));
        }
        if data_shards + parity_shards > MAX_TOTAL_SHARDS {
            return Err(Error::InvalidEcConfig(format!(
                "total shards must not exceed {}",
                MAX_TOTAL_SHARDS
            )));
        }

        let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Shard length used for an object of `size` bytes
    pub fn shard_size(&self, size: usize) -> usize {
        size.div_ceil(self.data_shards)
    }

    /// Partition `data` into exactly `data_shards` equally sized data shards.
    ///
    /// The last data shard is zero-padded. The returned set already has
    /// `total_shards()` entries; the parity slots are zeroed placeholders
    /// until [`encode`](Self::encode) fills them.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(Error::EncodingFailed(
                "cannot split an empty value".to_string(),
            ));
        }

        let shard_size = self.shard_size(data.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for chunk in data.chunks(shard_size) {
            let mut shard = chunk.to_vec();
            shard.resize(shard_size, 0);
            shards.push(shard);
        }
        // Small payloads may not reach every data shard
        while shards.len() < self.data_shards {
            shards.push(vec![0u8; shard_size]);
        }
        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; shard_size]);
        }

        if shards.len() != self.total_shards() {
            return Err(Error::EncodingFailed(format!(
                "split produced {} shards, expected {}",
                shards.len(),
                self.total_shards()
            )));
        }

        Ok(shards)
    }

    /// Fill the parity slots from the data shards in place
    #[instrument(skip(self, shards))]
    pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        self.check_len(shards.len())?;

        self.rs
            .encode(shards)
            .map_err(|e| Error::EncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))
    }

    /// Split, encode and verify `data`, producing the full shard set.
    ///
    /// Fails with `EncodingFailed` when the freshly encoded set does not verify.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn encode_object(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut shards = self.split(data)?;
        self.encode(&mut shards)?;

        if !self.verify(&shards)? {
            return Err(Error::EncodingFailed(
                "encoded shards failed verification".to_string(),
            ));
        }

        debug!(
            "Encoded {} bytes into {} shards of {} bytes each",
            data.len(),
            self.total_shards(),
            shards[0].len()
        );

        Ok(shards)
    }

    /// Verify that the parity shards are consistent with the data shards
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        self.check_len(shards.len())?;

        self.rs
            .verify(shards)
            .map_err(|e| Error::EncodingFailed(format!("Verification failed: {}", e)))
    }

    /// Verify a possibly incomplete shard set without mutating it.
    ///
    /// Returns `false` when any slot is missing, when shard sizes disagree,
    /// or when parity does not match.
    pub fn verify_present(&self, shards: &[Option<Vec<u8>>]) -> bool {
        if shards.len() != self.total_shards() {
            return false;
        }

        let mut present: Vec<&[u8]> = Vec::with_capacity(shards.len());
        for shard in shards {
            match shard {
                Some(s) if !s.is_empty() => present.push(s.as_slice()),
                _ => return false,
            }
        }

        let size = present[0].len();
        if present.iter().any(|s| s.len() != size) {
            return false;
        }

        self.rs.verify(present.as_slice()).unwrap_or(false)
    }

    /// Reconstruct missing shards in place.
    ///
    /// At least k shards must be present for reconstruction to succeed.
    #[instrument(skip(self, shards))]
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_len(shards.len())?;

        // Empty buffers are treated as missing
        for shard in shards.iter_mut() {
            if shard.as_ref().is_some_and(|s| s.is_empty()) {
                *shard = None;
            }
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }

        self.rs
            .reconstruct(shards)
            .map_err(|e| Error::Unrecoverable(format!("Reed-Solomon reconstruction failed: {}", e)))?;

        debug!(
            "Reconstructed shards from {}/{} available",
            available,
            self.total_shards()
        );

        Ok(())
    }

    /// Read-path decode: verify, reconstruct if needed, re-verify.
    ///
    /// On success every slot of `shards` is populated and consistent.
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>]) -> Result<DecodeStatus> {
        if self.verify_present(shards) {
            debug!("No reconstruction needed");
            return Ok(DecodeStatus {
                all_good: true,
                reconstructed: false,
            });
        }

        debug!("Verification failed, reconstructing");
        self.reconstruct(shards)?;

        if !self.verify_present(shards) {
            return Err(Error::Unrecoverable(
                "verification failed after reconstruction, data could be corrupted".to_string(),
            ));
        }

        Ok(DecodeStatus {
            all_good: false,
            reconstructed: true,
        })
    }

    /// Reassemble the first `size` bytes of the object from the data shards.
    ///
    /// The returned reader walks the data shards lazily; nothing is
    /// concatenated up front.
    pub fn join(&self, shards: Vec<Option<Vec<u8>>>, size: usize) -> Result<JoinReader> {
        self.check_len(shards.len())?;

        let mut data = Vec::with_capacity(self.data_shards);
        for (i, shard) in shards.into_iter().take(self.data_shards).enumerate() {
            match shard {
                Some(s) => data.push(s),
                None => {
                    return Err(Error::Unrecoverable(format!(
                        "data shard {} missing at join",
                        i
                    )))
                }
            }
        }

        let available: usize = data.iter().map(Vec::len).sum();
        if size > available {
            return Err(Error::SizeMismatch {
                requested: size,
                available,
            });
        }

        Ok(JoinReader::new(data, size))
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                len
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Calculate storage overhead ratio (total/data)
pub fn storage_overhead(data_shards: usize, parity_shards: usize) -> f64 {
    (data_shards + parity_shards) as f64 / data_shards as f64
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn to_options(shards: Vec<Vec<u8>>) -> Vec<Option<Vec<u8>>> {
        shards.into_iter().map(Some).collect()
    }

    #[test]
    fn test_coder_new() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        assert_eq!(coder.data_shards(), 4);
        assert_eq!(coder.parity_shards(), 2);
        assert_eq!(coder.total_shards(), 6);
    }

    #[test]
    fn test_coder_invalid_config() {
        assert!(ErasureCoder::new(0, 2).is_err());
        assert!(ErasureCoder::new(4, 0).is_err());
        assert!(ErasureCoder::new(200, 100).is_err());
    }

    #[test]
    fn test_split_produces_total_shards() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let shards = coder.split(&[7u8; 9000]).unwrap();

        assert_eq!(shards.len(), 6);
        assert!(shards.iter().all(|s| s.len() == 2250));
        // Parity placeholders stay zeroed until encode
        assert!(shards[4].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_split_small_value_pads_every_data_shard() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let shards = coder.split(b"Hi").unwrap();

        assert_eq!(shards.len(), 6);
        assert!(shards.iter().all(|s| s.len() == 1));
        assert_eq!(shards[0], b"H");
        assert_eq!(shards[1], b"i");
        assert_eq!(shards[2], vec![0]);
    }

    #[test]
    fn test_split_empty_value_fails() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        assert!(matches!(coder.split(&[]), Err(Error::EncodingFailed(_))));
        assert!(matches!(
            coder.encode_object(&[]),
            Err(Error::EncodingFailed(_))
        ));
    }

    #[test]
    fn test_encode_object_verifies() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let shards = coder.encode_object(b"Test data for verification").unwrap();

        assert!(coder.verify(&shards).unwrap());
        assert!(coder.verify_present(&to_options(shards)));
    }

    #[test]
    fn test_verify_present_rejects_missing_slot() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let mut shards = to_options(coder.encode_object(b"some payload").unwrap());
        shards[3] = None;

        assert!(!coder.verify_present(&shards));
    }

    #[test]
    fn test_verify_present_detects_corruption() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let mut shards = to_options(coder.encode_object(&[42u8; 128]).unwrap());
        if let Some(s) = shards[1].as_mut() {
            s[0] ^= 0xFF;
        }

        assert!(!coder.verify_present(&shards));
    }

    #[test]
    fn test_verify_is_idempotent() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let shards = to_options(coder.encode_object(b"idempotent verify").unwrap());
        let snapshot = shards.clone();

        assert!(coder.verify_present(&shards));
        assert!(coder.verify_present(&shards));
        assert_eq!(shards, snapshot);
    }

    #[test]
    fn test_reconstruct_fills_missing() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let mut shards = to_options(coder.encode_object(b"Data for reconstruction test!").unwrap());
        let original_1 = shards[1].clone();
        let original_4 = shards[4].clone();

        shards[1] = None;
        shards[4] = None;
        coder.reconstruct(&mut shards).unwrap();

        assert_eq!(shards[1], original_1);
        assert_eq!(shards[4], original_4);
    }

    #[test]
    fn test_reconstruct_insufficient_shards() {
        let coder = ErasureCoder::new(4, 2).unwrap();

        let mut shards: Vec<Option<Vec<u8>>> = vec![
            Some(vec![0u8; 16]),
            Some(vec![0u8; 16]),
            Some(vec![0u8; 16]),
            None,
            None,
            None,
        ];

        let result = coder.reconstruct(&mut shards);
        assert!(matches!(
            result,
            Err(Error::InsufficientShards {
                available: 3,
                required: 4
            })
        ));
    }

    #[test]
    fn test_decode_reports_reconstruction() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let mut shards = to_options(coder.encode_object(&[1u8; 400]).unwrap());

        let status = coder.decode(&mut shards).unwrap();
        assert!(status.all_good);
        assert!(!status.reconstructed);

        shards[0] = None;
        let status = coder.decode(&mut shards).unwrap();
        assert!(!status.all_good);
        assert!(status.reconstructed);
        assert!(shards.iter().all(Option::is_some));
    }

    #[test]
    fn test_join_returns_exact_size() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let original: Vec<u8> = (0..9001u32).map(|i| (i % 251) as u8).collect();
        let shards = to_options(coder.encode_object(&original).unwrap());

        let mut reader = coder.join(shards, original.len()).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, original);
    }

    #[test]
    fn test_join_rejects_oversized_request() {
        let coder = ErasureCoder::new(4, 2).unwrap();
        let shards = to_options(coder.encode_object(&[9u8; 100]).unwrap());

        let result = coder.join(shards, 101);
        assert!(matches!(
            result,
            Err(Error::SizeMismatch {
                requested: 101,
                available: 100
            })
        ));
    }

    #[test]
    fn test_storage_overhead() {
        assert!((storage_overhead(4, 2) - 1.5).abs() < 0.001);
        assert!((storage_overhead(10, 2) - 1.2).abs() < 0.001);
    }

    #[test]
    fn test_various_configurations() {
        let configs = vec![(2, 1), (4, 2), (6, 3), (10, 4)];

        for (k, m) in configs {
            let coder = ErasureCoder::new(k, m).unwrap();
            let data = b"Test data for various configurations";
            let mut shards = to_options(coder.encode_object(data).unwrap());
            assert_eq!(shards.len(), k + m);

            for shard in shards.iter_mut().take(m) {
                *shard = None;
            }

            coder.decode(&mut shards).unwrap();
            let mut out = Vec::new();
            coder
                .join(shards, data.len())
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, data);
        }
    }
}
