//! HTTP provider client.
//!
//! The actual HTTP library is abstracted behind [`HttpClient`] so the engine
//! does not pick one (reqwest, ureq, hyper...). [`HttpProvider`] speaks the
//! JSON feed endpoints and maps provider status codes onto [`SyncError`].

use crate::error::{SyncError, SyncResult};
use crate::provider::{ProviderClient, ProviderFactory};
use fluxsync_core::{AttributeStore, Connection};
use fluxsync_protocol::{decode, ErrorBody, FeedState, NotePayload, PageRequest, SyncChunk};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attribute holding a connection's bearer token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// A response as seen by [`HttpProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Value of a `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with a body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body,
        }
    }

    /// A response with a status and body.
    pub fn with_status(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            retry_after: None,
            body,
        }
    }
}

/// HTTP client abstraction.
///
/// Returns `Err` only when no response was received at all (DNS, connect,
/// timeout); any status code is an `Ok` response.
pub trait HttpClient: Send + Sync {
    /// Sends an authenticated GET request.
    fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, String>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, String> {
        (**self).get(url, bearer_token)
    }
}

/// Provider client over HTTP and JSON.
pub struct HttpProvider<C: HttpClient> {
    /// Base URL of the provider API (e.g., "https://sandbox.evernote.com/api").
    base_url: String,
    client: C,
    token: String,
    default_rate_limit: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpProvider<C> {
    /// Creates a client authenticated with `token`.
    pub fn new(base_url: impl Into<String>, client: C, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: token.into(),
            default_rate_limit: Duration::from_secs(60),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the wait used when a 429 names no duration.
    pub fn with_default_rate_limit(mut self, wait: Duration) -> Self {
        self.default_rate_limit = wait;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "provider request");

        let response = self.client.get(&url, &self.token).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transient(e)
        })?;

        if (200..300).contains(&response.status) {
            *self.last_error.write() = None;
            return Ok(decode(&response.body)?);
        }

        let err = self.status_error(&response);
        warn!(status = response.status, error = %err, "provider request failed");
        *self.last_error.write() = Some(err.to_string());
        Err(err)
    }

    fn status_error(&self, response: &HttpResponse) -> SyncError {
        let body: ErrorBody = decode(&response.body).unwrap_or_default();
        let message = body
            .message
            .or(body.error_code)
            .unwrap_or_else(|| format!("status {}", response.status));

        match response.status {
            429 => {
                let retry_after = response
                    .retry_after
                    .or(body.rate_limit_duration)
                    .map_or(self.default_rate_limit, Duration::from_secs);
                SyncError::RateLimited { retry_after }
            }
            401 | 403 => SyncError::AuthExpired(message),
            408 | 500..=599 => SyncError::transient(message),
            status => SyncError::Provider { status, message },
        }
    }
}

fn check_guid(guid: &str) -> SyncResult<&str> {
    let usable = !guid.is_empty()
        && guid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if usable {
        Ok(guid)
    } else {
        Err(SyncError::data_integrity(
            "note",
            format!("guid {guid:?} cannot be used in a URL"),
        ))
    }
}

impl<C: HttpClient> ProviderClient for HttpProvider<C> {
    fn feed_state(&self) -> SyncResult<FeedState> {
        self.get_json("/sync/state")
    }

    fn sync_chunk(&self, request: &PageRequest) -> SyncResult<SyncChunk> {
        self.get_json(&format!(
            "/sync/chunk?afterUSN={}&maxEntries={}&fullSyncOnly={}",
            request.after_usn, request.max_entries, request.full_sync
        ))
    }

    fn note(&self, guid: &str) -> SyncResult<NotePayload> {
        let guid = check_guid(guid)?;
        self.get_json(&format!(
            "/notes/{guid}?withContent=true&withResourcesData=true&withResourcesRecognition=true&withResourcesAlternateData=true"
        ))
    }
}

/// Builds [`HttpProvider`]s from per-provider base URLs and the connection's
/// stored token.
pub struct HttpProviderFactory<C: HttpClient + Clone> {
    client: C,
    base_urls: BTreeMap<String, String>,
    default_rate_limit: Duration,
}

impl<C: HttpClient + Clone> HttpProviderFactory<C> {
    /// Creates a factory with no providers.
    pub fn new(client: C) -> Self {
        Self {
            client,
            base_urls: BTreeMap::new(),
            default_rate_limit: Duration::from_secs(60),
        }
    }

    /// Registers the API base URL of a provider.
    pub fn with_provider(mut self, provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(provider.into(), base_url.into());
        self
    }

    /// Sets the wait used when a 429 names no duration.
    pub fn with_default_rate_limit(mut self, wait: Duration) -> Self {
        self.default_rate_limit = wait;
        self
    }
}

impl<C: HttpClient + Clone + 'static> ProviderFactory for HttpProviderFactory<C> {
    fn client_for(
        &self,
        connection: &Connection,
        attributes: &dyn AttributeStore,
    ) -> SyncResult<Arc<dyn ProviderClient>> {
        let base_url = self
            .base_urls
            .get(&connection.provider)
            .ok_or_else(|| SyncError::UnsupportedProvider(connection.provider.clone()))?;
        let token = attributes
            .get(connection.id, ACCESS_TOKEN_KEY)?
            .ok_or_else(|| SyncError::AuthExpired("no access token stored".into()))?;

        Ok(Arc::new(
            HttpProvider::new(base_url.clone(), self.client.clone(), token)
                .with_default_rate_limit(self.default_rate_limit),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_core::{ConnectionRegistry, Database, GuestId, ManualClock};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        responses: Mutex<Vec<Result<HttpResponse, String>>>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl TestClient {
        fn respond(&self, response: Result<HttpResponse, String>) {
            self.responses.lock().push(response);
        }

        fn urls(&self) -> Vec<String> {
            self.seen.lock().iter().map(|(url, _)| url.clone()).collect()
        }
    }

    impl HttpClient for TestClient {
        fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, String> {
            self.seen
                .lock()
                .push((url.to_string(), bearer_token.to_string()));
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err("no response set".into());
            }
            responses.remove(0)
        }
    }

    fn provider() -> (Arc<TestClient>, HttpProvider<Arc<TestClient>>) {
        let client = Arc::new(TestClient::default());
        let provider = HttpProvider::new("https://api.example.com/", client.clone(), "tok");
        (client, provider)
    }

    #[test]
    fn feed_state_decodes_json() {
        let (client, provider) = provider();
        client.respond(Ok(HttpResponse::ok(
            br#"{"updateCount": 10, "fullSyncBefore": 0, "currentTime": 99}"#.to_vec(),
        )));

        let state = provider.feed_state().unwrap();
        assert_eq!(state.update_count, 10);
        assert_eq!(client.urls(), vec!["https://api.example.com/sync/state"]);
        assert_eq!(client.seen.lock()[0].1, "tok");
        assert_eq!(provider.last_error(), None);
    }

    #[test]
    fn chunk_request_carries_cursor() {
        let (client, provider) = provider();
        client.respond(Ok(HttpResponse::ok(
            br#"{"chunkHighUSN": 12, "updateCount": 12, "currentTime": 5}"#.to_vec(),
        )));

        let chunk = provider
            .sync_chunk(&PageRequest::new(10, 200, false))
            .unwrap();
        assert_eq!(chunk.chunk_high_usn, Some(12));
        assert_eq!(
            client.urls()[0],
            "https://api.example.com/sync/chunk?afterUSN=10&maxEntries=200&fullSyncOnly=false"
        );
    }

    #[test]
    fn rate_limit_uses_retry_after() {
        let (client, provider) = provider();
        client.respond(Ok(HttpResponse {
            status: 429,
            retry_after: Some(60),
            body: Vec::new(),
        }));
        client.respond(Ok(HttpResponse::with_status(
            429,
            br#"{"errorCode": "RATE_LIMIT_REACHED", "rateLimitDuration": 15}"#.to_vec(),
        )));
        client.respond(Ok(HttpResponse::with_status(429, Vec::new())));

        let provider = provider.with_default_rate_limit(Duration::from_secs(5));
        for expected in [60, 15, 5] {
            match provider.feed_state() {
                Err(SyncError::RateLimited { retry_after }) => {
                    assert_eq!(retry_after, Duration::from_secs(expected));
                }
                other => panic!("expected rate limit, got {other:?}"),
            }
        }
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let (client, provider) = provider();
        client.respond(Ok(HttpResponse::with_status(
            401,
            br#"{"errorCode": "AUTH_EXPIRED"}"#.to_vec(),
        )));
        client.respond(Ok(HttpResponse::with_status(503, Vec::new())));
        client.respond(Ok(HttpResponse::with_status(400, Vec::new())));
        client.respond(Err("connection refused".into()));
        client.respond(Ok(HttpResponse::ok(b"not json".to_vec())));

        assert!(matches!(provider.feed_state(), Err(SyncError::AuthExpired(m)) if m == "AUTH_EXPIRED"));
        assert!(provider.feed_state().unwrap_err().is_retryable());
        assert!(matches!(
            provider.feed_state(),
            Err(SyncError::Provider { status: 400, .. })
        ));
        assert!(provider.feed_state().unwrap_err().is_retryable());
        assert_eq!(provider.last_error().as_deref(), Some("connection refused"));
        assert!(matches!(
            provider.feed_state(),
            Err(SyncError::DataIntegrity { .. })
        ));
    }

    #[test]
    fn note_guid_is_validated() {
        let (client, provider) = provider();
        assert!(matches!(
            provider.note("../admin"),
            Err(SyncError::DataIntegrity { entity: "note", .. })
        ));
        assert!(client.urls().is_empty());

        client.respond(Ok(HttpResponse::ok(
            br#"{"guid": "a-1", "title": "hello"}"#.to_vec(),
        )));
        assert_eq!(provider.note("a-1").unwrap().title.as_deref(), Some("hello"));
        assert!(client.urls()[0].starts_with("https://api.example.com/notes/a-1?"));
    }

    #[test]
    fn factory_requires_token_and_known_provider() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConnectionRegistry::new();
        let clock = ManualClock::new(0);
        let evernote = registry.create(GuestId::new(1), "evernote", &clock);
        let other = registry.create(GuestId::new(1), "fitbit", &clock);

        let factory = HttpProviderFactory::new(Arc::new(TestClient::default()))
            .with_provider("evernote", "https://api.example.com");

        assert!(matches!(
            factory.client_for(&evernote, &db),
            Err(SyncError::AuthExpired(_))
        ));
        db.set(evernote.id, ACCESS_TOKEN_KEY, "secret").unwrap();
        assert!(factory.client_for(&evernote, &db).is_ok());

        db.set(other.id, ACCESS_TOKEN_KEY, "secret").unwrap();
        assert!(matches!(
            factory.client_for(&other, &db),
            Err(SyncError::UnsupportedProvider(_))
        ));
    }
}
