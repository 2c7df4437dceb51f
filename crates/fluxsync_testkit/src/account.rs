//! A simulated provider account.
//!
//! Unlike [`fluxsync_engine::MockProvider`], which replays recorded pages,
//! a [`ScriptedAccount`] keeps live account state: every change is stamped
//! with the next update sequence number, pages are cut from that state on
//! request, and expunges leave tombstones that only incremental requests see.

use fluxsync_core::Clock;
use fluxsync_engine::{MockCall, MockCalls, MockFailure, ProviderClient, SyncError, SyncResult};
use fluxsync_protocol::{
    FeedState, NotePayload, NotebookPayload, PageRequest, ResourcePayload, SyncChunk, TagPayload,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Key {
    Tag(String),
    Notebook(String),
    Note(String),
    Resource(String),
}

#[derive(Debug, Clone)]
enum Change {
    Tag(TagPayload),
    Notebook(NotebookPayload),
    Note(NotePayload),
    Resource(ResourcePayload),
    Expunged,
}

#[derive(Debug, Clone)]
struct Entry {
    usn: i32,
    change: Change,
}

#[derive(Default)]
struct AccountState {
    usn: i32,
    full_sync_before: i64,
    entries: BTreeMap<Key, Entry>,
    failures: VecDeque<(MockCall, MockFailure)>,
    calls: MockCalls,
    requests: Vec<PageRequest>,
}

impl AccountState {
    fn stamp(&mut self, key: Key, change: Change) -> i32 {
        self.usn += 1;
        self.entries.insert(
            key,
            Entry {
                usn: self.usn,
                change,
            },
        );
        self.usn
    }

    fn take_failure(&mut self, call: MockCall) -> Option<SyncError> {
        let position = self.failures.iter().position(|(c, _)| *c == call)?;
        let (_, failure) = self.failures.remove(position)?;
        Some(match failure {
            MockFailure::RateLimited(retry_after) => SyncError::RateLimited { retry_after },
            MockFailure::AuthExpired => SyncError::AuthExpired("token revoked".into()),
            MockFailure::Transient(message) => SyncError::transient(message),
        })
    }
}

/// A provider account whose contents tests edit directly.
pub struct ScriptedAccount {
    clock: Arc<dyn Clock>,
    state: Mutex<AccountState>,
}

impl ScriptedAccount {
    /// Creates an empty account reading time from `clock`.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            state: Mutex::new(AccountState::default()),
        }
    }

    /// Highest update sequence number assigned so far.
    pub fn update_count(&self) -> i32 {
        self.state.lock().usn
    }

    /// Creates or renames a tag. Returns its new USN.
    pub fn put_tag(&self, guid: &str, name: &str) -> i32 {
        self.put_tag_payload(TagPayload {
            guid: Some(guid.to_string()),
            name: Some(name.to_string()),
            ..TagPayload::default()
        })
    }

    /// Stores a tag payload as given. Returns its new USN.
    ///
    /// # Panics
    ///
    /// Panics if the payload has no guid.
    pub fn put_tag_payload(&self, mut tag: TagPayload) -> i32 {
        let guid = tag.guid.clone().expect("tag payload needs a guid");
        let mut state = self.state.lock();
        tag.update_sequence_num = Some(state.usn + 1);
        state.stamp(Key::Tag(guid), Change::Tag(tag))
    }

    /// Creates or renames a notebook. Returns its new USN.
    pub fn put_notebook(&self, guid: &str, name: &str) -> i32 {
        self.put_notebook_payload(NotebookPayload {
            guid: Some(guid.to_string()),
            name: Some(name.to_string()),
            ..NotebookPayload::default()
        })
    }

    /// Stores a notebook payload as given. Returns its new USN.
    ///
    /// # Panics
    ///
    /// Panics if the payload has no guid.
    pub fn put_notebook_payload(&self, mut notebook: NotebookPayload) -> i32 {
        let guid = notebook.guid.clone().expect("notebook payload needs a guid");
        let mut state = self.state.lock();
        notebook.update_sequence_num = Some(state.usn + 1);
        state.stamp(Key::Notebook(guid), Change::Notebook(notebook))
    }

    /// Stores the full form of a note, resources included. Returns its new
    /// USN. The change feed will carry the note without content or
    /// resources; the full form is served by [`ProviderClient::note`].
    ///
    /// # Panics
    ///
    /// Panics if the note has no guid.
    pub fn put_note(&self, mut note: NotePayload) -> i32 {
        let guid = note.guid.clone().expect("note payload needs a guid");
        let mut state = self.state.lock();
        let usn = state.usn + 1;
        note.update_sequence_num = Some(usn);
        for resource in note.resources.iter_mut().flatten() {
            resource.note_guid.get_or_insert_with(|| guid.clone());
            resource.update_sequence_num.get_or_insert(usn);
        }
        state.stamp(Key::Note(guid), Change::Note(note))
    }

    /// Changes a resource on its own, outside of a note update. Returns its
    /// new USN.
    ///
    /// # Panics
    ///
    /// Panics if the resource has no guid.
    pub fn put_resource(&self, mut resource: ResourcePayload) -> i32 {
        let guid = resource.guid.clone().expect("resource payload needs a guid");
        let mut state = self.state.lock();
        resource.update_sequence_num = Some(state.usn + 1);

        // Keep the parent's full form in step.
        if let Some(note_guid) = resource.note_guid.clone() {
            if let Some(Entry {
                change: Change::Note(note),
                ..
            }) = state.entries.get_mut(&Key::Note(note_guid))
            {
                let resources = note.resources.get_or_insert_with(Vec::new);
                resources.retain(|r| r.guid.as_deref() != Some(guid.as_str()));
                resources.push(resource.clone());
            }
        }
        state.stamp(Key::Resource(guid), Change::Resource(resource))
    }

    /// Expunges a note and its resources. Returns the tombstone's USN.
    pub fn expunge_note(&self, guid: &str) -> i32 {
        let mut state = self.state.lock();
        state.entries.retain(|key, entry| match (key, &entry.change) {
            (Key::Resource(_), Change::Resource(r)) => r.note_guid.as_deref() != Some(guid),
            _ => true,
        });
        state.stamp(Key::Note(guid.to_string()), Change::Expunged)
    }

    /// Expunges a notebook. The provider lists only the notebook; its notes
    /// disappear from the feed without tombstones of their own.
    pub fn expunge_notebook(&self, guid: &str) -> i32 {
        let mut state = self.state.lock();
        let notes: Vec<String> = state
            .entries
            .iter()
            .filter_map(|(key, entry)| match (key, &entry.change) {
                (Key::Note(id), Change::Note(n)) if n.notebook_guid.as_deref() == Some(guid) => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for note in &notes {
            state.entries.remove(&Key::Note(note.clone()));
        }
        state.entries.retain(|key, entry| match (key, &entry.change) {
            (Key::Resource(_), Change::Resource(r)) => r
                .note_guid
                .as_ref()
                .map_or(true, |parent| !notes.contains(parent)),
            _ => true,
        });
        state.stamp(Key::Notebook(guid.to_string()), Change::Expunged)
    }

    /// Expunges a tag. Returns the tombstone's USN.
    pub fn expunge_tag(&self, guid: &str) -> i32 {
        self.state
            .lock()
            .stamp(Key::Tag(guid.to_string()), Change::Expunged)
    }

    /// Declares every checkpoint taken before now invalid.
    pub fn invalidate_checkpoints(&self) {
        let now = self.clock.now_millis();
        self.state.lock().full_sync_before = now;
    }

    /// Makes the next `call` fail with `failure`.
    pub fn fail_next(&self, call: MockCall, failure: MockFailure) {
        self.state.lock().failures.push_back((call, failure));
    }

    /// Returns the call counters.
    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls
    }

    /// Returns every page request received, in order.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.state.lock().requests.clone()
    }
}

impl ProviderClient for ScriptedAccount {
    fn feed_state(&self) -> SyncResult<FeedState> {
        let mut state = self.state.lock();
        state.calls.feed_state += 1;
        if let Some(err) = state.take_failure(MockCall::FeedState) {
            return Err(err);
        }
        Ok(FeedState {
            update_count: state.usn,
            full_sync_before: state.full_sync_before,
            current_time: self.clock.now_millis(),
        })
    }

    fn sync_chunk(&self, request: &PageRequest) -> SyncResult<SyncChunk> {
        let mut state = self.state.lock();
        state.calls.sync_chunk += 1;
        state.requests.push(*request);
        if let Some(err) = state.take_failure(MockCall::SyncChunk) {
            return Err(err);
        }

        let mut pending: Vec<(&Key, &Entry)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.usn > request.after_usn)
            .filter(|(_, entry)| !(request.full_sync && matches!(entry.change, Change::Expunged)))
            .collect();
        pending.sort_by_key(|(_, entry)| entry.usn);
        pending.truncate(request.max_entries.max(1) as usize);

        let mut chunk = SyncChunk {
            current_time: self.clock.now_millis(),
            chunk_high_usn: pending.last().map(|(_, entry)| entry.usn),
            update_count: state.usn,
            ..SyncChunk::default()
        };
        for (key, entry) in pending {
            match (key, &entry.change) {
                (_, Change::Tag(tag)) => chunk.tags.push(tag.clone()),
                (_, Change::Notebook(notebook)) => chunk.notebooks.push(notebook.clone()),
                (_, Change::Note(note)) => chunk.notes.push(NotePayload {
                    content: None,
                    resources: None,
                    ..note.clone()
                }),
                (_, Change::Resource(resource)) => chunk.resources.push(resource.clone()),
                (Key::Tag(guid), Change::Expunged) => chunk.expunged_tags.push(guid.clone()),
                (Key::Notebook(guid), Change::Expunged) => {
                    chunk.expunged_notebooks.push(guid.clone())
                }
                (Key::Note(guid), Change::Expunged) => chunk.expunged_notes.push(guid.clone()),
                (Key::Resource(_), Change::Expunged) => {}
            }
        }
        Ok(chunk)
    }

    fn note(&self, guid: &str) -> SyncResult<NotePayload> {
        let mut state = self.state.lock();
        state.calls.note += 1;
        if let Some(err) = state.take_failure(MockCall::Note) {
            return Err(err);
        }
        match state.entries.get(&Key::Note(guid.to_string())) {
            Some(Entry {
                change: Change::Note(note),
                ..
            }) => Ok(note.clone()),
            _ => Err(SyncError::Provider {
                status: 404,
                message: format!("note {guid} not found"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_core::ManualClock;

    #[test]
    fn changes_get_increasing_usns() {
        let account = ScriptedAccount::new(ManualClock::new(5));
        assert_eq!(account.put_tag("t1", "one"), 1);
        assert_eq!(account.put_notebook("b1", "inbox"), 2);
        assert_eq!(account.put_tag("t1", "renamed"), 3);
        assert_eq!(account.update_count(), 3);

        let chunk = account.sync_chunk(&PageRequest::new(0, 100, true)).unwrap();
        // The renamed tag replaced its earlier version.
        assert_eq!(chunk.tags.len(), 1);
        assert_eq!(chunk.tags[0].name.as_deref(), Some("renamed"));
        assert_eq!(chunk.chunk_high_usn, Some(3));
        assert_eq!(chunk.current_time, 5);
    }

    #[test]
    fn pages_respect_max_entries() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        for i in 0..5 {
            account.put_tag(&format!("t{i}"), "tag");
        }
        let first = account.sync_chunk(&PageRequest::new(0, 2, true)).unwrap();
        assert_eq!(first.tags.len(), 2);
        assert_eq!(first.chunk_high_usn, Some(2));
        assert!(!first.is_last());

        let last = account.sync_chunk(&PageRequest::new(4, 2, true)).unwrap();
        assert_eq!(last.chunk_high_usn, Some(5));
        assert!(last.is_last());
    }

    #[test]
    fn tombstones_only_in_incremental_pages() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        account.put_tag("t1", "one");
        account.expunge_tag("t1");

        let full = account.sync_chunk(&PageRequest::new(0, 100, true)).unwrap();
        assert!(full.expunged_tags.is_empty());
        assert!(full.tags.is_empty());

        let incremental = account.sync_chunk(&PageRequest::new(0, 100, false)).unwrap();
        assert_eq!(incremental.expunged_tags, vec!["t1".to_string()]);
    }

    #[test]
    fn feed_notes_are_metadata_only() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        account.put_note(NotePayload {
            guid: Some("n1".into()),
            content: Some("<en-note/>".into()),
            resources: Some(vec![ResourcePayload {
                guid: Some("r1".into()),
                ..ResourcePayload::default()
            }]),
            ..NotePayload::default()
        });

        let chunk = account.sync_chunk(&PageRequest::new(0, 100, true)).unwrap();
        assert!(chunk.notes[0].content.is_none());
        assert!(chunk.notes[0].resources.is_none());

        let full = account.note("n1").unwrap();
        assert!(full.content.is_some());
        let resources = full.resources.unwrap();
        assert_eq!(resources[0].note_guid.as_deref(), Some("n1"));
    }

    #[test]
    fn expunged_notebook_takes_its_notes() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        account.put_notebook("b1", "work");
        account.put_note(NotePayload {
            guid: Some("n1".into()),
            notebook_guid: Some("b1".into()),
            ..NotePayload::default()
        });
        account.expunge_notebook("b1");

        assert!(account.note("n1").is_err());
        let chunk = account.sync_chunk(&PageRequest::new(0, 100, false)).unwrap();
        assert!(chunk.notes.is_empty());
        assert_eq!(chunk.expunged_notebooks, vec!["b1".to_string()]);
        assert!(chunk.expunged_notes.is_empty());
    }

    #[test]
    fn queued_failures_come_first() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        account.fail_next(MockCall::FeedState, MockFailure::AuthExpired);
        assert!(matches!(account.feed_state(), Err(SyncError::AuthExpired(_))));
        assert!(account.feed_state().is_ok());
        assert_eq!(account.calls().feed_state, 2);
    }
}
