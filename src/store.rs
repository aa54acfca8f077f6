//! JSON-array asset stores (notes, media). A store is opened fresh on
//! every request (snapshots never cache) and an unopenable store is the
//! caller's 503, not a panic or a silent empty result.

use serde_json::Value;
use std::path::Path;

pub struct AssetStore {
    rows: Vec<Value>,
}

pub struct AssetPage {
    pub rows: Vec<Value>,
    pub total: usize,
}

impl AssetStore {
    /// `None` when the backing file is missing, unreadable, or not a
    /// JSON array.
    pub fn open(path: &Path) -> Option<AssetStore> {
        let text = std::fs::read_to_string(path).ok()?;
        let rows: Vec<Value> = serde_json::from_str(&text).ok()?;
        Some(AssetStore { rows })
    }

    /// Case-insensitive substring filter over the serialized row, then
    /// offset/limit pagination. `total` counts matches before paging.
    pub fn query(
        &self,
        filter: Option<&str>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AssetPage {
        let needle = filter.map(str::to_lowercase).filter(|n| !n.is_empty());
        let matched: Vec<&Value> = self
            .rows
            .iter()
            .filter(|row| match &needle {
                Some(needle) => row.to_string().to_lowercase().contains(needle),
                None => true,
            })
            .collect();
        let total = matched.len();
        let rows = matched
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        AssetPage { rows, total }
    }
}
