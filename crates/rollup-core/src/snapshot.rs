//! Binary `.rlup` snapshots of a [`HierarchyIndex`].
//!
//! Layout:
//!
//! ```text
//! "RLUP" | version: u32 LE | payload_len: u64 LE | bincode payload
//! ```
//!
//! The payload stores only the source data (keys, parent column, value and
//! property columns). Loading replays it through [`HierarchyBuilder`], so a
//! tampered snapshot fails the same forest checks as a fresh build.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RollupError};
use crate::hierarchy::{Hierarchy, HierarchyBuilder, HierarchyIndex};
use crate::ItemId;

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"RLUP";
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotPayloadV1 {
    keys: Vec<String>,
    parents: Vec<Option<u32>>,
    /// (attribute, [(item, value)])
    values: Vec<(String, Vec<(u32, f64)>)>,
    /// (property, [(item, value)])
    properties: Vec<(String, Vec<(u32, String)>)>,
}

impl HierarchyIndex {
    /// Serialize to the `.rlup` binary format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let keys = self
            .items()
            .map(|item| self.key_of(item))
            .collect::<Result<Vec<_>>>()?;
        let parents = self
            .items()
            .map(|item| Ok(self.parent_of(item)?.map(ItemId::raw)))
            .collect::<Result<Vec<_>>>()?;
        let values = self
            .attributes()
            .into_iter()
            .map(|attribute| {
                let col = self
                    .value_column(&attribute)
                    .into_iter()
                    .map(|(item, v)| (item.raw(), v))
                    .collect();
                (attribute, col)
            })
            .collect();
        let properties = self
            .property_names()
            .into_iter()
            .map(|property| {
                let col = self
                    .property_column(&property)
                    .into_iter()
                    .map(|(item, v)| (item.raw(), v))
                    .collect();
                (property, col)
            })
            .collect();

        let payload = bincode::serialize(&SnapshotPayloadV1 {
            keys,
            parents,
            values,
            properties,
        })?;

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Deserialize from the `.rlup` binary format, re-validating the forest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let payload = match split_header(bytes) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(len = bytes.len(), error = %err, "rejected snapshot header");
                return Err(err);
            }
        };
        let payload: SnapshotPayloadV1 = bincode::deserialize(payload)?;

        if payload.parents.len() != payload.keys.len() {
            return Err(invalid(format!(
                "{} keys but {} parent entries",
                payload.keys.len(),
                payload.parents.len()
            )));
        }

        let mut builder = HierarchyBuilder::new();
        for key in &payload.keys {
            builder.add_item(key)?;
        }
        for (raw, parent) in payload.parents.iter().enumerate() {
            if let Some(parent) = parent {
                builder.set_parent(ItemId::new(raw as u32), ItemId::new(*parent))?;
            }
        }
        for (attribute, col) in &payload.values {
            for &(raw, value) in col {
                builder.set_value(ItemId::new(raw), attribute, value)?;
            }
        }
        for (property, col) in &payload.properties {
            for (raw, value) in col {
                builder.set_property(ItemId::new(*raw), property, value)?;
            }
        }
        builder.build()
    }
}

fn split_header(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(invalid("not a rollup snapshot".to_string()));
    }

    let version = u32::from_le_bytes(read_array(&bytes[4..8])?);
    if version != SNAPSHOT_VERSION {
        return Err(invalid(format!("unsupported snapshot version {version}")));
    }

    let len = u64::from_le_bytes(read_array(&bytes[8..HEADER_LEN])?) as usize;
    let body = &bytes[HEADER_LEN..];
    if body.len() != len {
        return Err(invalid(format!(
            "payload length {} does not match header ({len})",
            body.len()
        )));
    }
    Ok(body)
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| invalid(format!("expected {N} header bytes")))
}

fn invalid(reason: String) -> RollupError {
    RollupError::InvalidSnapshot { reason }
}
