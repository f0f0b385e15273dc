//! Events emitted on the incremental photo stream.
//!
//! Each event is serialized as one JSON object per line.

use crate::photo::Photo;
use serde::{Deserialize, Serialize};

/// One line of the photo stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A batch of photos, cached or live.
    Photos {
        photos: Vec<Photo>,
        #[serde(rename = "hasNext")]
        has_next: bool,
        /// Only set on the cached batch.
        #[serde(
            rename = "isCompleteCoverage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        is_complete_coverage: Option<bool>,
    },
    /// A region finished paginating and is now complete.
    RegionComplete { region: String, photos_count: u64 },
    /// A recoverable failure; the stream continues.
    Error { message: String },
    /// Always the final event.
    StreamComplete {
        total_live_photos: u64,
        total_cached_photos: u64,
        total_all_photos: u64,
    },
}

impl StreamEvent {
    /// Serialize as a newline-terminated JSON line.
    pub fn to_ndjson_line(&self) -> crate::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamComplete { .. })
    }
}
