//! JSON encoding for feed payloads and recorded feeds.

use crate::chunk::{FeedState, SyncChunk};
use crate::error::ProtocolResult;
use crate::payload::NotePayload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decodes a JSON document.
///
/// # Errors
///
/// Returns [`crate::ProtocolError::Json`] if the bytes are not valid JSON of
/// the expected shape.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encodes a value as compact JSON.
///
/// # Errors
///
/// Returns [`crate::ProtocolError::Json`] if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Error document returned by a provider alongside a non-success status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorBody {
    /// Provider error code, e.g. `RATE_LIMIT_REACHED`.
    pub error_code: Option<String>,
    /// Free-form message.
    pub message: Option<String>,
    /// Seconds to wait before the next call, when rate limited.
    pub rate_limit_duration: Option<u64>,
}

/// A captured change feed: feed state, pages in order, and the full notes
/// the pages refer to.
///
/// Used to replay a sync cycle offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFeed {
    /// Feed state reported at the start of the cycle.
    pub feed_state: Option<FeedState>,
    /// Pages in the order the provider returned them.
    #[serde(default)]
    pub pages: Vec<SyncChunk>,
    /// Full note payloads by guid.
    #[serde(default)]
    pub notes: BTreeMap<String, NotePayload>,
}

impl RecordedFeed {
    /// Parses a recorded feed from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::Json`] if the document is malformed.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }

    /// Serializes the feed as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::Json`] if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
