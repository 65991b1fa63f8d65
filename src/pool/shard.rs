//! Deterministic shard assignment.
//!
//! An item belongs to shard `hash(id) mod W` where `hash` is the first eight
//! bytes (big endian) of SHA-256 over the ID. The orchestrator never tells a
//! worker which items to process; both sides compute the same partition.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Result, StagehandError};

/// Stable 64-bit hash of an item ID.
pub fn id_hash(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Shard index of `id` among `count` shards. A count of 0 is treated as 1.
pub fn shard_of(id: &str, count: usize) -> usize {
    let count = count.max(1) as u64;
    (id_hash(id) % count) as usize
}

/// One worker's slice of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ShardSpec {
    pub index: usize,
    pub count: usize,
}

impl ShardSpec {
    pub fn new(index: usize, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(StagehandError::Config("shard count must be at least 1".to_string()));
        }
        if index >= count {
            return Err(StagehandError::Config(format!(
                "shard index {} out of range for {} shards",
                index, count
            )));
        }
        Ok(Self { index, count })
    }

    /// The whole pending set in one shard.
    pub fn whole() -> Self {
        Self { index: 0, count: 1 }
    }

    pub fn owns(&self, id: &str) -> bool {
        shard_of(id, self.count) == self.index
    }

    /// Keep only the IDs this shard owns, preserving order.
    pub fn select<'a, I>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        ids.into_iter().filter(|id| self.owns(id)).cloned().collect()
    }

    /// Shard flags as passed on a worker command line.
    pub fn to_args(&self) -> [String; 4] {
        [
            "--shard".to_string(),
            self.index.to_string(),
            "--shard-count".to_string(),
            self.count.to_string(),
        ]
    }

    /// Find `--shard <i> --shard-count <W>` (or the `=` forms) in an argument
    /// list. Returns `None` when neither flag is present.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Option<Self>> {
        let mut index = None;
        let mut count = None;

        let mut iter = args.iter().map(S::as_ref);
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (arg, None),
            };
            let slot = match flag {
                "--shard" => &mut index,
                "--shard-count" => &mut count,
                _ => continue,
            };
            let value = match inline {
                Some(v) => v,
                None => iter
                    .next()
                    .ok_or_else(|| StagehandError::Config(format!("{} requires a value", flag)))?,
            };
            let parsed = value
                .parse::<usize>()
                .map_err(|_| StagehandError::Config(format!("{} expects a number, got {:?}", flag, value)))?;
            *slot = Some(parsed);
        }

        match (index, count) {
            (None, None) => Ok(None),
            (Some(i), Some(w)) => Self::new(i, w).map(Some),
            (Some(_), None) => Err(StagehandError::Config("--shard given without --shard-count".to_string())),
            (None, Some(_)) => Err(StagehandError::Config("--shard-count given without --shard".to_string())),
        }
    }
}

impl std::fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

/// Split `ids` into `count` shards. Every ID lands in exactly one shard.
pub fn partition(ids: &[String], count: usize) -> Vec<Vec<String>> {
    let count = count.max(1);
    let mut shards = vec![Vec::new(); count];
    for id in ids {
        shards[shard_of(id, count)].push(id.clone());
    }
    shards
}
