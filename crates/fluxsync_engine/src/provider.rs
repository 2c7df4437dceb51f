//! Provider client abstraction.
//!
//! A [`ProviderClient`] is the engine's only view of a remote service: the
//! feed state, one page of the change feed, and a full item fetch. Each
//! provider implements it once; [`crate::HttpProvider`] does so over HTTP and
//! [`MockProvider`] serves a recorded feed from memory.

use crate::error::{SyncError, SyncResult};
use fluxsync_core::{AttributeStore, Connection, ConnectionId};
use fluxsync_protocol::{FeedState, NotePayload, PageRequest, RecordedFeed, SyncChunk};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Client for one connection's remote account.
///
/// Implementations translate their provider's rate-limit and authorization
/// failures into [`SyncError::RateLimited`] and [`SyncError::AuthExpired`];
/// anything else surfaces as another [`SyncError`].
pub trait ProviderClient: Send + Sync {
    /// Returns the current state of the change feed.
    fn feed_state(&self) -> SyncResult<FeedState>;

    /// Fetches one page of the change feed.
    fn sync_chunk(&self, request: &PageRequest) -> SyncResult<SyncChunk>;

    /// Fetches a note in full, with content and resources including their
    /// binary bodies.
    fn note(&self, guid: &str) -> SyncResult<NotePayload>;
}

/// Builds the client a connection syncs through.
pub trait ProviderFactory: Send + Sync {
    /// Returns a client authenticated for `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthExpired`] when the connection's credentials
    /// are missing and [`SyncError::UnsupportedProvider`] when no client
    /// exists for its provider.
    fn client_for(
        &self,
        connection: &Connection,
        attributes: &dyn AttributeStore,
    ) -> SyncResult<Arc<dyn ProviderClient>>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&Connection, &dyn AttributeStore) -> SyncResult<Arc<dyn ProviderClient>> + Send + Sync,
{
    fn client_for(
        &self,
        connection: &Connection,
        attributes: &dyn AttributeStore,
    ) -> SyncResult<Arc<dyn ProviderClient>> {
        self(connection, attributes)
    }
}

/// A factory handing out pre-built clients by connection id.
#[derive(Default)]
pub struct StaticProviders {
    clients: RwLock<HashMap<ConnectionId, Arc<dyn ProviderClient>>>,
}

impl StaticProviders {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the client used for `connection_id`.
    pub fn register(&self, connection_id: ConnectionId, client: Arc<dyn ProviderClient>) {
        self.clients.write().insert(connection_id, client);
    }
}

impl ProviderFactory for StaticProviders {
    fn client_for(
        &self,
        connection: &Connection,
        _attributes: &dyn AttributeStore,
    ) -> SyncResult<Arc<dyn ProviderClient>> {
        self.clients
            .read()
            .get(&connection.id)
            .cloned()
            .ok_or_else(|| SyncError::UnsupportedProvider(connection.provider.clone()))
    }
}

/// Calls a [`MockProvider`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    /// [`ProviderClient::feed_state`].
    FeedState,
    /// [`ProviderClient::sync_chunk`].
    SyncChunk,
    /// [`ProviderClient::note`].
    Note,
}

/// A failure a [`MockProvider`] returns instead of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Rate limited for the given duration.
    RateLimited(Duration),
    /// Credentials rejected.
    AuthExpired,
    /// Transient failure with a message.
    Transient(String),
}

impl MockFailure {
    fn into_error(self) -> SyncError {
        match self {
            MockFailure::RateLimited(retry_after) => SyncError::RateLimited { retry_after },
            MockFailure::AuthExpired => SyncError::AuthExpired("token rejected".into()),
            MockFailure::Transient(message) => SyncError::transient(message),
        }
    }
}

/// How many times each call was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// Feed state queries.
    pub feed_state: usize,
    /// Page fetches.
    pub sync_chunk: usize,
    /// Full note fetches.
    pub note: usize,
}

/// In-memory provider serving a [`RecordedFeed`].
///
/// Pages are served by cursor: a request after USN `n` gets the first
/// recorded page whose high USN is above `n`, so the same feed answers both
/// full and incremental cycles. Failures queued with
/// [`MockProvider::fail_next`] are returned before any data.
pub struct MockProvider {
    state: Mutex<MockState>,
}

struct MockState {
    feed: RecordedFeed,
    failures: VecDeque<(MockCall, MockFailure)>,
    calls: MockCalls,
    requests: Vec<PageRequest>,
}

impl MockProvider {
    /// Creates a provider serving `feed`.
    pub fn from_feed(feed: RecordedFeed) -> Self {
        Self {
            state: Mutex::new(MockState {
                feed,
                failures: VecDeque::new(),
                calls: MockCalls::default(),
                requests: Vec::new(),
            }),
        }
    }

    /// Creates a provider with an empty feed at `update_count`.
    pub fn empty(update_count: i32, current_time: i64) -> Self {
        Self::from_feed(RecordedFeed {
            feed_state: Some(FeedState {
                update_count,
                full_sync_before: 0,
                current_time,
            }),
            ..RecordedFeed::default()
        })
    }

    /// Replaces the reported feed state.
    pub fn set_feed_state(&self, state: FeedState) {
        self.state.lock().feed.feed_state = Some(state);
    }

    /// Appends a page to the feed.
    pub fn push_page(&self, chunk: SyncChunk) {
        self.state.lock().feed.pages.push(chunk);
    }

    /// Stores the full form of a note.
    pub fn put_note(&self, note: NotePayload) {
        if let Some(guid) = note.guid.clone() {
            self.state.lock().feed.notes.insert(guid, note);
        }
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

impl MockState {
    fn take_failure(&mut self, call: MockCall) -> Option<SyncError> {
        let position = self.failures.iter().position(|(c, _)| *c == call)?;
        self.failures
            .remove(position)
            .map(|(_, failure)| failure.into_error())
    }

    fn feed_state(&self) -> FeedState {
        if let Some(state) = self.feed.feed_state {
            return state;
        }
        let last = self.feed.pages.last();
        FeedState {
            update_count: last.map_or(0, |p| p.update_count),
            full_sync_before: 0,
            current_time: last.map_or(0, |p| p.current_time),
        }
    }
}

impl ProviderClient for MockProvider {
    fn feed_state(&self) -> SyncResult<FeedState> {
        let mut state = self.state.lock();
        state.calls.feed_state += 1;
        if let Some(err) = state.take_failure(MockCall::FeedState) {
            return Err(err);
        }
        Ok(state.feed_state())
    }

    fn sync_chunk(&self, request: &PageRequest) -> SyncResult<SyncChunk> {
        let mut state = self.state.lock();
        state.calls.sync_chunk += 1;
        state.requests.push(*request);
        if let Some(err) = state.take_failure(MockCall::SyncChunk) {
            return Err(err);
        }

        let page = state.feed.pages.iter().find(|page| {
            page.chunk_high_usn
                .map_or(false, |high| high > request.after_usn)
        });
        match page {
            Some(page) => Ok(page.clone()),
            None => {
                let feed = state.feed_state();
                Ok(SyncChunk {
                    current_time: feed.current_time,
                    chunk_high_usn: None,
                    update_count: feed.update_count,
                    ..SyncChunk::default()
                })
            }
        }
    }

    fn note(&self, guid: &str) -> SyncResult<NotePayload> {
        let mut state = self.state.lock();
        state.calls.note += 1;
        if let Some(err) = state.take_failure(MockCall::Note) {
            return Err(err);
        }

        if let Some(note) = state.feed.notes.get(guid) {
            return Ok(note.clone());
        }
        // Fall back to the most recent metadata the pages carry.
        state
            .feed
            .pages
            .iter()
            .rev()
            .flat_map(|page| page.notes.iter())
            .find(|note| note.guid.as_deref() == Some(guid))
            .cloned()
            .ok_or_else(|| SyncError::Provider {
                status: 404,
                message: format!("note {guid} not found"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_core::{ConnectionRegistry, Database, GuestId, ManualClock};
    use fluxsync_protocol::TagPayload;

    fn page(high: i32, update_count: i32) -> SyncChunk {
        SyncChunk {
            current_time: 1_000,
            chunk_high_usn: Some(high),
            update_count,
            tags: vec![TagPayload {
                guid: Some(format!("t{high}")),
                ..TagPayload::default()
            }],
            ..SyncChunk::default()
        }
    }

    #[test]
    fn pages_are_served_by_cursor() {
        let mock = MockProvider::empty(4, 1_000);
        mock.push_page(page(2, 4));
        mock.push_page(page(4, 4));

        let first = mock.sync_chunk(&PageRequest::new(0, 200, true)).unwrap();
        assert_eq!(first.chunk_high_usn, Some(2));
        let second = mock.sync_chunk(&PageRequest::new(2, 200, true)).unwrap();
        assert_eq!(second.chunk_high_usn, Some(4));
        let past_end = mock.sync_chunk(&PageRequest::new(4, 200, false)).unwrap();
        assert_eq!(past_end.chunk_high_usn, None);
        assert!(past_end.is_last());

        assert_eq!(mock.calls().sync_chunk, 3);
        assert_eq!(mock.requests()[1].after_usn, 2);
    }

    #[test]
    fn injected_failures_are_returned_once() {
        let mock = MockProvider::empty(1, 0);
        mock.fail_next(
            MockCall::FeedState,
            MockFailure::RateLimited(Duration::from_secs(60)),
        );

        assert!(matches!(
            mock.feed_state(),
            Err(SyncError::RateLimited { retry_after }) if retry_after == Duration::from_secs(60)
        ));
        assert_eq!(mock.feed_state().unwrap().update_count, 1);
        assert_eq!(mock.calls().feed_state, 2);
    }

    #[test]
    fn note_falls_back_to_page_metadata() {
        let mock = MockProvider::empty(1, 0);
        mock.push_page(SyncChunk {
            chunk_high_usn: Some(1),
            update_count: 1,
            notes: vec![NotePayload {
                guid: Some("n1".into()),
                title: Some("metadata".into()),
                ..NotePayload::default()
            }],
            ..SyncChunk::default()
        });

        assert_eq!(mock.note("n1").unwrap().title.as_deref(), Some("metadata"));

        mock.put_note(NotePayload {
            guid: Some("n1".into()),
            title: Some("full".into()),
            content: Some("<en-note/>".into()),
            ..NotePayload::default()
        });
        assert_eq!(mock.note("n1").unwrap().title.as_deref(), Some("full"));
        assert!(matches!(
            mock.note("missing"),
            Err(SyncError::Provider { status: 404, .. })
        ));
    }

    #[test]
    fn static_providers_by_connection() {
        let registry = ConnectionRegistry::new();
        let clock = ManualClock::new(0);
        let known = registry.create(GuestId::new(1), "evernote", &clock);
        let unknown = registry.create(GuestId::new(1), "evernote", &clock);
        let db = Database::open_in_memory().unwrap();

        let providers = StaticProviders::new();
        providers.register(known.id, Arc::new(MockProvider::empty(0, 0)));

        assert!(providers.client_for(&known, &db).is_ok());
        assert!(matches!(
            providers.client_for(&unknown, &db),
            Err(SyncError::UnsupportedProvider(p)) if p == "evernote"
        ));
    }
}
