//! Records flowing through the query pipeline, and their wire forms.
//!
//! `ScoreRecord` is the unit of traffic from the reader down to the final
//! reply; it is the only record type that crosses the shard boundary, as a
//! bincode-encoded flat list. The probe context and the accumulator
//! argument are serialized alongside so a remote shard can reconstruct the
//! same reader and the same reducer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{VEC_BLOB_LEN, VEC_DIM};

/// One scored hit: the owning key name and its cosine similarity to the
/// probe. The key is a retained reference — deleting the key after a
/// record was emitted does not invalidate the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub key: Arc<str>,
    pub score: f32,
}

/// Serialized reader context shipped to every shard: the raw probe and the
/// requested K. Each shard normalizes the probe on reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub probe: Vec<f32>,
    pub top_k: u64,
}

impl ProbeSpec {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let spec: ProbeSpec = bincode::deserialize(bytes)?;
        // A mis-sized probe here means a corrupted transport frame.
        assert_eq!(spec.probe.len(), VEC_DIM, "probe spec has wrong dimension");
        Ok(spec)
    }
}

/// Accumulator argument for the top-K reduction stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TopKArg {
    pub top_k: u64,
}

/// Decode a client blob of exactly `VEC_DIM` little-endian f32 values.
/// Returns `None` on any other length; the caller picks the error string.
pub fn decode_blob(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() != VEC_BLOB_LEN {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Encode a vector as the little-endian f32 blob the commands accept.
pub fn encode_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v: Vec<f32> = (0..VEC_DIM).map(|i| i as f32 * 0.25).collect();
        let blob = encode_blob(&v);
        assert_eq!(blob.len(), VEC_DIM * 4);
        assert_eq!(decode_blob(&blob), Some(v));
    }

    #[test]
    fn blob_rejects_wrong_length() {
        assert!(decode_blob(&[0u8; 12]).is_none());
        assert!(decode_blob(&vec![0u8; VEC_DIM * 4 + 4]).is_none());
    }

    #[test]
    fn probe_spec_wire_roundtrip() {
        let spec = ProbeSpec {
            probe: vec![0.5; VEC_DIM],
            top_k: 7,
        };
        let bytes = spec.to_bytes().unwrap();
        let back = ProbeSpec::from_bytes(&bytes).unwrap();
        assert_eq!(back.top_k, 7);
        assert_eq!(back.probe, spec.probe);
    }

    #[test]
    fn score_record_wire_roundtrip() {
        let records = vec![
            ScoreRecord {
                key: Arc::from("k1"),
                score: 0.25,
            },
            ScoreRecord {
                key: Arc::from("k2"),
                score: -0.5,
            },
        ];
        let bytes = bincode::serialize(&records).unwrap();
        let back: Vec<ScoreRecord> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(&*back[0].key, "k1");
        assert_eq!(back[1].score, -0.5);
    }
}
