//! Snapshot persistence for the store.
//!
//! Layout: a header carrying the value-type identifier, the format
//! version, and the entry count, followed by one frame per entry — the
//! key name and the raw `VEC_DIM * 4` little-endian f32 bytes. Vectors
//! are saved as stored (already normalized); load re-inserts through the
//! arena path, which re-normalizes harmlessly and rebuilds the swap
//! structure from scratch.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arena::DEFAULT_SEGMENT_CAPACITY;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::VEC_DIM;

/// Value-type identifier recorded in every snapshot.
pub const TYPE_ID: &str = "vec_index";

/// Snapshot format version; a mismatch is fatal to the load.
pub const VEC_TYPE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotHeader {
    type_id: String,
    version: u32,
    entries: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    vec: Vec<u8>,
}

impl Store {
    /// Serialize every entry to `writer`.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let world = self.world();

        let entries = world.keys.len() as u64;
        bincode::serialize_into(
            &mut writer,
            &SnapshotHeader {
                type_id: TYPE_ID.to_string(),
                version: VEC_TYPE_VERSION,
                entries,
            },
        )?;

        if let Some(arena) = &world.arena {
            for (entry, vector) in arena.entries() {
                bincode::serialize_into(
                    &mut writer,
                    &SnapshotEntry {
                        key: entry.key().to_string(),
                        vec: vector.iter().flat_map(|f| f.to_le_bytes()).collect(),
                    },
                )?;
            }
        }

        debug!(entries, "snapshot saved");
        Ok(())
    }

    /// Rebuild a store from a snapshot stream, with the default segment
    /// capacity.
    pub fn load<R: Read>(reader: R) -> Result<Store> {
        Self::load_with_capacity(reader, DEFAULT_SEGMENT_CAPACITY)
    }

    pub fn load_with_capacity<R: Read>(mut reader: R, segment_capacity: usize) -> Result<Store> {
        let header: SnapshotHeader = bincode::deserialize_from(&mut reader)?;
        if header.type_id != TYPE_ID {
            return Err(Error::SnapshotTypeId(header.type_id));
        }
        if header.version != VEC_TYPE_VERSION {
            return Err(Error::SnapshotVersion(header.version));
        }

        let store = Store::with_segment_capacity(segment_capacity);
        for _ in 0..header.entries {
            let frame: SnapshotEntry = bincode::deserialize_from(&mut reader)?;
            // A wrong-sized vector buffer means the stream is corrupt.
            assert_eq!(
                frame.vec.len(),
                VEC_DIM * 4,
                "snapshot entry has a mis-sized vector buffer"
            );
            store.vec_add(&frame.key, &frame.vec)?;
        }

        debug!(entries = header.entries, "snapshot loaded");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::record::encode_blob;

    fn basis(axis: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0; VEC_DIM];
        v[axis] = value;
        v
    }

    fn vectors_by_key(store: &Store) -> HashMap<String, Vec<f32>> {
        let world = store.world();
        let mut out = HashMap::new();
        if let Some(arena) = &world.arena {
            for (entry, vector) in arena.entries() {
                out.insert(entry.key().to_string(), vector.to_vec());
            }
        }
        out
    }

    #[test]
    fn roundtrip_preserves_the_key_vector_map() {
        let store = Store::with_segment_capacity(2);
        for i in 0..5 {
            // unnormalized on purpose: save emits the normalized form
            store
                .vec_add(&format!("k{i}"), &encode_blob(&basis(i, (i + 2) as f32)))
                .unwrap();
        }
        // a delete before save exercises the swapped layout
        store.delete_key("k1");

        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();

        let loaded = Store::load_with_capacity(buf.as_slice(), 2).unwrap();
        let before = vectors_by_key(&store);
        let after = vectors_by_key(&loaded);
        assert_eq!(before.len(), after.len());
        for (key, vector) in &before {
            let restored = &after[key];
            // load re-normalizes, so allow for one normalization of drift
            assert!(
                vector
                    .iter()
                    .zip(restored.iter())
                    .all(|(a, b)| (a - b).abs() < 1e-6),
                "vector for {key} drifted across the roundtrip"
            );
        }
    }

    #[test]
    fn empty_store_roundtrips() {
        let store = Store::new();
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();
        let loaded = Store::load(buf.as_slice()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.segment_count(), 0);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let header = SnapshotHeader {
            type_id: TYPE_ID.to_string(),
            version: 2,
            entries: 0,
        };
        let buf = bincode::serialize(&header).unwrap();
        assert!(matches!(
            Store::load(buf.as_slice()),
            Err(Error::SnapshotVersion(2))
        ));
    }

    #[test]
    fn foreign_type_id_is_fatal() {
        let header = SnapshotHeader {
            type_id: "not_vectors".to_string(),
            version: VEC_TYPE_VERSION,
            entries: 0,
        };
        let buf = bincode::serialize(&header).unwrap();
        assert!(matches!(
            Store::load(buf.as_slice()),
            Err(Error::SnapshotTypeId(id)) if id == "not_vectors"
        ));
    }

    #[test]
    fn truncated_stream_surfaces_a_codec_error() {
        let store = Store::new();
        store.vec_add("k0", &encode_blob(&basis(0, 1.0))).unwrap();
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();
        buf.truncate(buf.len() - 10);
        assert!(matches!(Store::load(buf.as_slice()), Err(Error::Codec(_))));
    }
}
