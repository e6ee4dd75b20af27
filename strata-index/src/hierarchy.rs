//! The hierarchy: which chunks exist, and how many points each holds.
//!
//! Readers consult this map before fetching chunk objects, and a continued
//! build uses it to know which chunk ids are already on disk.
//!
//! ## Stored format
//!
//! ```text
//! magic: "SHR1"          (4 bytes)
//! version: u8            (= 1)
//! codec: u8              (0 = zstd, 1 = none)
//! crc32: u32 LE          (of the encoded body)
//! body: codec-encoded JSON map { "<chunk id>": count }
//! ```

use crate::error::{IndexError, Result};
use crate::format::{HierarchyCodec, COMPRESSION_LEVEL};
use crate::id::Id;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::str::FromStr;

const MAGIC: &[u8; 4] = b"SHR1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 10;

/// Thread-safe chunk-id → point-count map.
#[derive(Debug, Default)]
pub struct Hierarchy {
    counts: Mutex<FxHashMap<Id, u64>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add points to a chunk's count.
    pub fn add(&self, id: &Id, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.lock().entry(id.clone()).or_insert(0) += count;
    }

    /// Replace a chunk's count.
    pub fn set(&self, id: &Id, count: u64) {
        self.counts.lock().insert(id.clone(), count);
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.counts.lock().contains_key(id)
    }

    pub fn count(&self, id: &Id) -> Option<u64> {
        self.counts.lock().get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    pub fn total_points(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Fold another hierarchy's counts into this one.
    pub fn merge(&self, other: &Hierarchy) {
        let other = other.counts.lock();
        let mut counts = self.counts.lock();
        for (id, count) in other.iter() {
            *counts.entry(id.clone()).or_insert(0) += count;
        }
    }

    /// Encode to the stored representation.
    pub fn to_bytes(&self, codec: HierarchyCodec) -> Result<Vec<u8>> {
        // Keys sort so the bytes are deterministic.
        let sorted: BTreeMap<String, u64> = self
            .counts
            .lock()
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect();
        let json = serde_json::to_vec(&sorted)?;
        let body = match codec {
            HierarchyCodec::Zstd => zstd::encode_all(&json[..], COMPRESSION_LEVEL)
                .map_err(|e| IndexError::Compression(format!("hierarchy encode: {e}")))?,
            HierarchyCodec::None => json,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(match codec {
            HierarchyCodec::Zstd => 0,
            HierarchyCodec::None => 1,
        });
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode from the stored representation.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(IndexError::Format("hierarchy object too short".into()));
        }
        if &data[..4] != MAGIC {
            return Err(IndexError::Format("invalid hierarchy magic".into()));
        }
        if data[4] != VERSION {
            return Err(IndexError::Format(format!(
                "unsupported hierarchy version {}",
                data[4]
            )));
        }
        let codec = match data[5] {
            0 => HierarchyCodec::Zstd,
            1 => HierarchyCodec::None,
            other => {
                return Err(IndexError::Format(format!(
                    "unknown hierarchy codec {other}"
                )))
            }
        };
        let expected_crc = u32::from_le_bytes(data[6..10].try_into().unwrap());
        let body = &data[HEADER_LEN..];
        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            return Err(IndexError::Integrity(format!(
                "hierarchy CRC32 mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let json = match codec {
            HierarchyCodec::Zstd => zstd::decode_all(body)
                .map_err(|e| IndexError::Compression(format!("hierarchy decode: {e}")))?,
            HierarchyCodec::None => body.to_vec(),
        };
        let sorted: BTreeMap<String, u64> = serde_json::from_slice(&json)?;

        let mut counts = FxHashMap::default();
        for (key, count) in sorted {
            let id = Id::from_str(&key)
                .map_err(|e| IndexError::Format(format!("hierarchy key: {e}")))?;
            counts.insert(id, count);
        }
        Ok(Self {
            counts: Mutex::new(counts),
        })
    }
}
