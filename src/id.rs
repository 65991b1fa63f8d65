//! ID generation utilities for Stagehand
//!
//! Item IDs are deterministic: the same catalog source always maps to the same ID,
//! so re-ingesting a catalog never duplicates items or orphans stage output.

use uuid::Uuid;

/// Namespace for item IDs derived from catalog sources.
const ITEM_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d8_5b07_a1e2_4c5d_8f90_b3a6);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Derive the stable item ID for a catalog source (usually a file path).
///
/// Format: lowercase hyphenated UUIDv5
/// Example: `item_id_for("2019/IMG_0001.HEIC")`
pub fn item_id_for(source: &str) -> String {
    Uuid::new_v5(&ITEM_NAMESPACE, source.as_bytes()).to_string()
}
