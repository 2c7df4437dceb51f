//! # Fluxsync Protocol
//!
//! Provider change-feed types and JSON codecs for Fluxsync.
//!
//! This crate provides:
//! - Item payloads (`NotePayload`, `ResourcePayload`, `NotebookPayload`,
//!   `TagPayload`) where every field is optional
//! - `SyncChunk` pages and the `FeedState` they are fetched against
//! - JSON helpers and `RecordedFeed` for offline replay
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod codec;
mod error;
mod payload;

pub use chunk::{FeedState, PageRequest, SyncChunk, DEFAULT_PAGE_SIZE};
pub use codec::{decode, encode, ErrorBody, RecordedFeed};
pub use error::{ProtocolError, ProtocolResult};
pub use payload::{
    DataBody, NoteAttributes, NotePayload, NotebookPayload, Publishing, ResourceAttributes,
    ResourcePayload, TagPayload,
};
