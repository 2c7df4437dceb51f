//! Change-feed pages and feed state.

use crate::payload::{NotePayload, NotebookPayload, ResourcePayload, TagPayload};
use serde::{Deserialize, Serialize};

/// Default number of entries requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Current state of a provider's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedState {
    /// Highest USN that exists in the account.
    pub update_count: i32,
    /// Cursors saved before this time (epoch ms) are invalid.
    #[serde(default)]
    pub full_sync_before: i64,
    /// Server time (epoch ms).
    pub current_time: i64,
}

/// A request for one page of the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Return changes with a USN above this one.
    pub after_usn: i32,
    /// Maximum number of entries in the page.
    pub max_entries: u32,
    /// True when the cycle is a full sync; expunge lists are not needed.
    pub full_sync: bool,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub const fn new(after_usn: i32, max_entries: u32, full_sync: bool) -> Self {
        Self {
            after_usn,
            max_entries,
            full_sync,
        }
    }
}

/// One page of a provider's change feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncChunk {
    /// Server time (epoch ms).
    pub current_time: i64,
    /// Highest USN of any item in this page.
    #[serde(rename = "chunkHighUSN")]
    pub chunk_high_usn: Option<i32>,
    /// Highest USN in the account.
    pub update_count: i32,
    /// Created or updated notes (metadata only).
    pub notes: Vec<NotePayload>,
    /// Created or updated notebooks.
    pub notebooks: Vec<NotebookPayload>,
    /// Created or updated tags.
    pub tags: Vec<TagPayload>,
    /// Created or updated resources.
    pub resources: Vec<ResourcePayload>,
    /// Guids of expunged notes.
    pub expunged_notes: Vec<String>,
    /// Guids of expunged notebooks.
    pub expunged_notebooks: Vec<String>,
    /// Guids of expunged tags.
    pub expunged_tags: Vec<String>,
}

impl SyncChunk {
    /// Returns true if no further page follows this one.
    ///
    /// A page without a high USN carries no changes and also ends the feed.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.chunk_high_usn
            .map_or(true, |high| high >= self.update_count)
    }

    /// Number of upserted and expunged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
            + self.notebooks.len()
            + self.tags.len()
            + self.resources.len()
            + self.expunged_notes.len()
            + self.expunged_notebooks.len()
            + self.expunged_tags.len()
    }

    /// Returns true if the page carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
