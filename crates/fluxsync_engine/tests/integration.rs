//! Integration tests for the sync engine against simulated provider accounts.

use fluxsync_core::{
    AttributeStore, ConnectionId, ConnectionStatus, Facet, FacetBody, FacetKind, FacetQuery,
    FacetStore, GuestId, NoteFacet,
};
use fluxsync_engine::{
    merge_note, CancelToken, CleanupConfig, CleanupQueue, MockCall, MockFailure, MockProvider,
    ProviderClient, Scheduler, SchedulerConfig, SyncError, SyncOutcome, SyncResult,
};
use fluxsync_protocol::{
    DataBody, FeedState, NoteAttributes, NotePayload, PageRequest, ResourceAttributes,
    ResourcePayload, SyncChunk,
};
use fluxsync_storage::{BlobKey, BlobRole, BlobStore};
use fluxsync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn geotagged_note(guid: &str, notebook: &str, resource: &str) -> NotePayload {
    NotePayload {
        guid: Some(guid.into()),
        title: Some(format!("note {guid}")),
        content: Some("<en-note>hi</en-note>".into()),
        created: Some(NOW - 10_000),
        notebook_guid: Some(notebook.into()),
        attributes: Some(NoteAttributes {
            latitude: Some(50.85),
            longitude: Some(4.35),
            altitude: Some(13.7),
            ..NoteAttributes::default()
        }),
        resources: Some(vec![ResourcePayload {
            guid: Some(resource.into()),
            mime: Some("image/jpeg".into()),
            data: Some(DataBody {
                body: Some(vec![0xff, 0xd8, 0xff]),
                body_hash: Some(vec![1, 2, 3]),
                size: Some(3),
            }),
            recognition: Some(DataBody {
                body: Some(b"<recoIndex/>".to_vec()),
                body_hash: Some(vec![4]),
                size: Some(12),
            }),
            attributes: Some(ResourceAttributes {
                latitude: Some(48.85),
                longitude: Some(2.35),
                timestamp: Some(NOW - 5_000),
                ..ResourceAttributes::default()
            }),
            ..ResourcePayload::default()
        }]),
        ..NotePayload::default()
    }
}

#[test]
fn first_sync_of_three_items_commits_checkpoint() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.put_notebook("b1", "journal");
        account.put_note(NotePayload {
            guid: Some("n1".into()),
            title: Some("Brussels".into()),
            notebook_guid: Some("b1".into()),
            ..NotePayload::default()
        });
        let id = env.connect(account.clone());

        let stats = env.sync_committed(id);
        assert!(stats.full_sync);
        assert_eq!(stats.upserted.tags, 1);
        assert_eq!(stats.upserted.notebooks, 1);
        assert_eq!(stats.upserted.notes, 1);
        assert_eq!(
            env.checkpoint(id),
            (Some("3".to_string()), Some(NOW.to_string()))
        );
        assert!(account.requests()[0].full_sync);
        assert_eq!(account.requests()[0].max_entries, 200);
    });
}

#[test]
fn unchanged_account_is_a_no_op() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        for i in 0..3 {
            account.put_tag(&format!("t{i}"), "tag");
        }
        let id = env.connect(account.clone());
        env.sync_committed(id);
        let pages = account.calls().sync_chunk;
        let journal = env.db.stats().unwrap().journal_records;

        env.clock.advance(60_000);
        assert_eq!(env.sync(id).unwrap(), SyncOutcome::NoOp);
        assert_eq!(account.calls().sync_chunk, pages);
        assert_eq!(env.db.stats().unwrap().journal_records, journal);
        assert_eq!(env.checkpoint(id).1, Some(NOW.to_string()));
    });
}

#[test]
fn rate_limit_defers_without_committing() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.fail_next(
            MockCall::SyncChunk,
            MockFailure::RateLimited(Duration::from_secs(60)),
        );
        let id = env.connect(account.clone());

        assert_eq!(
            env.sync(id).unwrap(),
            SyncOutcome::RateLimited { until: NOW + 60_000 }
        );
        assert_eq!(env.checkpoint(id), (None, None));
        let connection = env.engine.connections().get(id).unwrap();
        assert_eq!(connection.resume_not_before, Some(NOW + 60_000));
        assert!(!connection.may_sync_at(NOW + 59_999));
        assert!(connection.may_sync_at(NOW + 60_000));
    });
}

#[test]
fn incremental_cycles_resume_from_checkpoint() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.put_tag("t2", "food");
        let id = env.connect(account.clone());
        env.sync_committed(id);

        account.put_tag("t1", "trips");
        account.put_notebook("b1", "inbox");
        let stats = env.sync_committed(id);

        assert!(!stats.full_sync);
        assert_eq!(stats.upserted.tags, 1);
        assert_eq!(stats.upserted.notebooks, 1);
        let request = account.requests().last().copied().unwrap();
        assert_eq!(request.after_usn, 2);
        assert!(!request.full_sync);

        let tag = env.facet(id, FacetKind::Tag, "t1").unwrap();
        assert_eq!(tag.body.as_tag().unwrap().name.as_deref(), Some("trips"));
        assert_eq!(tag.usn, Some(3));
    });
}

#[test]
fn pages_are_followed_until_the_feed_is_drained() {
    let env = TestEnv::memory_with_config(quick_config().with_page_size(2));
    let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
    for i in 0..5 {
        account.put_tag(&format!("t{i}"), "tag");
    }
    let id = env.connect(account.clone());

    let stats = env.sync_committed(id);
    assert_eq!(stats.pages, 3);
    let cursors: Vec<i32> = account.requests().iter().map(|r| r.after_usn).collect();
    assert_eq!(cursors, vec![0, 2, 4]);
    assert_eq!(env.count(id, Some(FacetKind::Tag)), 5);
    assert_eq!(env.checkpoint(id).0.as_deref(), Some("5"));
}

#[test]
fn resources_bring_blobs_and_locations() {
    let env = TestEnv::file();
    let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
    account.put_notebook("b1", "travel");
    account.put_note(geotagged_note("n1", "b1", "r1"));
    let id = env.connect(account.clone());

    let stats = env.sync_committed(id);
    assert_eq!(stats.upserted.resources, 1);
    assert_eq!(stats.upserted.locations, 2);
    assert_eq!(stats.blobs_written, 2);

    let main = BlobKey::new(id.as_u64(), "r1", BlobRole::Main);
    assert_eq!(env.blobs.read(&main).unwrap(), Some(vec![0xff, 0xd8, 0xff]));
    let recognition = BlobKey::new(id.as_u64(), "r1", BlobRole::Recognition);
    assert!(env.blobs.exists(&recognition).unwrap());

    let resource = env.facet(id, FacetKind::Resource, "r1").unwrap();
    assert_eq!(
        resource.body.as_resource().unwrap().note_guid.as_deref(),
        Some("n1")
    );
    let location = env.facet(id, FacetKind::Location, "n1").unwrap();
    let location = location.body.as_location().unwrap();
    assert_eq!(location.altitude, Some(13));
    assert_eq!(location.timestamp_ms, NOW - 10_000);
    assert!(env.facet(id, FacetKind::Location, "r1").is_some());

    // Re-syncing an unchanged resource does not rewrite its bodies.
    account.put_note(geotagged_note("n1", "b1", "r1"));
    let stats = env.sync_committed(id);
    assert_eq!(stats.blobs_written, 0);
    assert_eq!(env.count(id, Some(FacetKind::Location)), 2);
}

#[test]
fn expunged_notebook_cascades_to_notes_and_blobs() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_notebook("b1", "travel");
        account.put_notebook("b2", "work");
        account.put_note(geotagged_note("n1", "b1", "r1"));
        account.put_note(geotagged_note("n2", "b2", "r2"));
        let id = env.connect(account.clone());
        env.sync_committed(id);

        account.expunge_notebook("b1");
        let stats = env.sync_committed(id);

        assert_eq!(stats.expunged.notebooks, 1);
        assert_eq!(stats.expunged.notes, 1);
        assert_eq!(stats.expunged.resources, 1);
        assert_eq!(stats.expunged.locations, 2);
        assert_eq!(stats.blobs_deleted, 2);
        assert!(env.facet(id, FacetKind::Note, "n1").is_none());
        assert!(env.facet(id, FacetKind::Location, "r1").is_none());
        assert!(env.facet(id, FacetKind::Note, "n2").is_some());
        let key = BlobKey::new(id.as_u64(), "r1", BlobRole::Main);
        assert!(!env.blobs.exists(&key).unwrap());
    });
}

#[test]
fn expunge_order_is_notes_then_notebooks_then_tags() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "a");
        account.put_notebook("b1", "inbox");
        account.put_note(geotagged_note("n1", "b1", "r1"));
        account.put_note(geotagged_note("n2", "b1", "r2"));
        let id = env.connect(account.clone());
        env.sync_committed(id);

        account.expunge_note("n1");
        account.expunge_notebook("b1");
        account.expunge_tag("t1");
        let stats = env.sync_committed(id);

        assert_eq!(stats.expunged.tags, 1);
        assert_eq!(stats.expunged.notebooks, 1);
        // n1 by its own tombstone, n2 through the notebook.
        assert_eq!(stats.expunged.notes, 2);
        assert_eq!(env.count(id, None), 0);
    });
}

#[test]
fn deletion_wins_within_a_cycle() {
    with_test_env(|env| {
        let mock = Arc::new(MockProvider::empty(1, NOW));
        mock.push_page(SyncChunk {
            current_time: NOW,
            chunk_high_usn: Some(1),
            update_count: 1,
            notes: vec![NotePayload {
                guid: Some("n0".into()),
                update_sequence_num: Some(1),
                ..NotePayload::default()
            }],
            ..SyncChunk::default()
        });
        let id = env.connect(mock.clone());
        env.sync_committed(id);

        mock.set_feed_state(FeedState {
            update_count: 3,
            full_sync_before: 0,
            current_time: NOW,
        });
        mock.push_page(SyncChunk {
            current_time: NOW,
            chunk_high_usn: Some(2),
            update_count: 3,
            notes: vec![NotePayload {
                guid: Some("n1".into()),
                title: Some("short lived".into()),
                update_sequence_num: Some(2),
                ..NotePayload::default()
            }],
            ..SyncChunk::default()
        });
        mock.push_page(SyncChunk {
            current_time: NOW,
            chunk_high_usn: Some(3),
            update_count: 3,
            expunged_notes: vec!["n1".into()],
            ..SyncChunk::default()
        });

        let stats = env.sync_committed(id);
        assert_eq!(stats.pages, 2);
        assert!(env.facet(id, FacetKind::Note, "n1").is_none());
        assert!(env.facet(id, FacetKind::Note, "n0").is_some());
        assert_eq!(mock.calls().note, 1);
        assert_eq!(env.checkpoint(id).0.as_deref(), Some("3"));
    });
}

#[test]
fn invalidated_checkpoint_triggers_full_resync() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "kept");
        account.put_tag("t2", "dropped");
        let id = env.connect(account.clone());
        env.sync_committed(id);

        // Local leftovers the provider no longer knows about.
        account.expunge_tag("t2");
        env.clock.advance(1_000);
        account.invalidate_checkpoints();
        env.clock.advance(1_000);

        let stats = env.sync_committed(id);
        assert!(stats.full_resync);
        assert!(stats.full_sync);
        assert!(env.facet(id, FacetKind::Tag, "t1").is_some());
        assert!(env.facet(id, FacetKind::Tag, "t2").is_none());
        let restart = account.requests()[1];
        assert_eq!(restart.after_usn, 0);
        assert!(restart.full_sync);
        assert_eq!(
            env.checkpoint(id),
            (Some("3".to_string()), Some((NOW + 2_000).to_string()))
        );

        // The new sync time is after the cut-off: back to incremental.
        account.put_tag("t3", "new");
        let stats = env.sync_committed(id);
        assert!(!stats.full_resync);
        assert!(!stats.full_sync);
    });
}

#[test]
fn auth_expiry_stops_the_connection() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.fail_next(MockCall::FeedState, MockFailure::AuthExpired);
        let id = env.connect(account.clone());

        assert_eq!(env.sync(id).unwrap(), SyncOutcome::AuthExpired);
        let connection = env.engine.connections().get(id).unwrap();
        assert_eq!(connection.status, ConnectionStatus::AuthExpired);
        assert!(!connection.may_sync_at(NOW + 3_600_000));

        // Re-authorized: cleared by the caller.
        env.engine
            .connections()
            .set_status(id, ConnectionStatus::Up)
            .unwrap();
        env.sync_committed(id);
    });
}

#[test]
fn retry_rides_out_transient_failures() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.fail_next(MockCall::SyncChunk, MockFailure::Transient("reset".into()));
        account.fail_next(MockCall::SyncChunk, MockFailure::Transient("reset".into()));
        let id = env.connect(account.clone());

        let outcome = env.engine.sync_with_retry(id, false).unwrap();
        assert!(matches!(outcome, SyncOutcome::Synced(_)));
        assert_eq!(env.engine.stats().retries, 2);
        assert_eq!(
            env.engine.connections().get(id).unwrap().status,
            ConnectionStatus::Up
        );
    });
}

#[test]
fn note_fetch_failure_leaves_checkpoint_untouched() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_tag("t1", "travel");
        account.put_note(geotagged_note("n1", "b1", "r1"));
        account.fail_next(MockCall::Note, MockFailure::Transient("timeout".into()));
        let id = env.connect(account.clone());

        assert!(env.sync(id).is_err());
        assert_eq!(env.checkpoint(id), (None, None));
        // Whatever was written is simply written again.
        let stats = env.sync_committed(id);
        assert_eq!(stats.upserted.notes, 1);
        assert_eq!(env.count(id, Some(FacetKind::Tag)), 1);
    });
}

/// Cancels the cycle once the first page has been served.
struct CancelAfterFirstPage {
    inner: Arc<ScriptedAccount>,
    cancel: CancelToken,
}

impl ProviderClient for CancelAfterFirstPage {
    fn feed_state(&self) -> SyncResult<FeedState> {
        self.inner.feed_state()
    }

    fn sync_chunk(&self, request: &PageRequest) -> SyncResult<SyncChunk> {
        let chunk = self.inner.sync_chunk(request);
        self.cancel.cancel();
        chunk
    }

    fn note(&self, guid: &str) -> SyncResult<NotePayload> {
        self.inner.note(guid)
    }
}

#[test]
fn cancellation_stops_between_pages() {
    let env = TestEnv::memory_with_config(quick_config().with_page_size(1));
    let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
    account.put_tag("t1", "a");
    account.put_tag("t2", "b");
    let cancel = CancelToken::new();
    let id = env.connect(Arc::new(CancelAfterFirstPage {
        inner: account.clone(),
        cancel: cancel.clone(),
    }));

    let err = env
        .engine
        .sync_connector_with_cancel(id, false, &cancel)
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(account.calls().sync_chunk, 1);
    assert_eq!(env.count(id, None), 0);
    assert_eq!(env.checkpoint(id), (None, None));
    assert!(!env.engine.connections().get(id).unwrap().synching);
}

#[test]
fn removal_operations_are_idempotent() {
    with_test_env(|env| {
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        account.put_notebook("b1", "travel");
        account.put_note(geotagged_note("n1", "b1", "r1"));
        account.put_note(geotagged_note("n2", "b1", "r2"));
        let id = env.connect(account.clone());
        env.sync_committed(id);

        let removed = env.engine.remove_leaf(id, "n1").unwrap();
        assert_eq!(removed.notes, 1);
        assert_eq!(removed.resources, 1);
        assert_eq!(env.engine.remove_leaf(id, "n1").unwrap().total(), 0);

        let removed = env.engine.remove_container(id, "b1").unwrap();
        assert_eq!(removed.notebooks, 1);
        assert_eq!(removed.notes, 1);
        assert_eq!(env.engine.remove_container(id, "b1").unwrap().total(), 0);
        assert_eq!(env.count(id, None), 0);
    });
}

#[test]
fn connections_are_isolated() {
    with_test_env(|env| {
        let first = Arc::new(ScriptedAccount::new(env.clock.clone()));
        first.put_tag("t1", "mine");
        let second = Arc::new(ScriptedAccount::new(env.clock.clone()));
        second.put_tag("t1", "theirs");
        second.put_tag("t2", "theirs too");

        let a = env.connect(first.clone());
        let b = env.connect_as(GuestId::new(2), "evernote", second.clone());
        env.sync_committed(a);
        env.sync_committed(b);

        second.expunge_tag("t1");
        env.sync_committed(b);

        assert!(env.facet(a, FacetKind::Tag, "t1").is_some());
        assert!(env.facet(b, FacetKind::Tag, "t1").is_none());
        assert_eq!(env.checkpoint(a).0.as_deref(), Some("1"));
        assert_eq!(env.checkpoint(b).0.as_deref(), Some("3"));
    });
}

#[tokio::test]
async fn scheduler_and_cleanup_share_the_engine() {
    let env = TestEnv::memory();
    let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
    account.put_notebook("b1", "travel");
    account.put_note(geotagged_note("n1", "b1", "r1"));
    let id = env.connect(account.clone());

    let scheduler = Scheduler::new(env.engine.clone(), SchedulerConfig::new(2));
    let results = scheduler.run_due().await;
    assert!(matches!(results[0].1, Ok(SyncOutcome::Synced(_))));

    let cleanup = CleanupQueue::for_engine(CleanupConfig::new(1), &env.engine);
    cleanup
        .remove_connection(env.engine.connections(), id)
        .await
        .unwrap();
    let report = cleanup.shutdown().await;

    assert_eq!(report.completed, 1);
    assert_eq!(env.count(id, None), 0);
    assert_eq!(env.db.get(id, "evernoteLastUpdateCount").unwrap(), None);
    assert_eq!(env.db.get(id, "evernoteLastSyncTime").unwrap(), None);
    assert!(!env
        .blobs
        .exists(&BlobKey::new(id.as_u64(), "r1", BlobRole::Main))
        .unwrap());
    assert!(scheduler.run_due().await.is_empty());
}

fn snapshot(env: &TestEnv, id: ConnectionId) -> Vec<(String, Option<i32>, FacetBody)> {
    let mut facets: Vec<_> = [
        FacetKind::Tag,
        FacetKind::Notebook,
        FacetKind::Note,
        FacetKind::Resource,
        FacetKind::Location,
    ]
    .into_iter()
    .flat_map(|kind| env.db.find_where(id, &FacetQuery::kind(kind)).unwrap())
    .map(|facet: Facet| (facet.provider_id, facet.usn, facet.body))
    .collect();
    facets.sort_by(|a, b| (a.2.kind().as_str(), &a.0).cmp(&(b.2.kind().as_str(), &b.0)));
    facets
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn incremental_sync_converges_to_full_sync(operations in account_operations_strategy(40)) {
        let env = TestEnv::memory_with_config(quick_config().with_page_size(3));
        let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
        let incremental = env.connect(account.clone());

        apply_operations(&account, &operations, || {
            env.sync(incremental).unwrap();
        });
        env.sync(incremental).unwrap();

        let fresh = env.connect_as(GuestId::new(2), "evernote", account.clone());
        env.sync(fresh).unwrap();

        prop_assert_eq!(snapshot(&env, incremental), snapshot(&env, fresh));
        prop_assert_eq!(env.checkpoint(incremental), env.checkpoint(fresh));
    }

    #[test]
    fn absent_fields_never_clobber(first in note_payload_strategy(), second in note_payload_strategy()) {
        let mut facet = Facet::new(
            ConnectionId::new(1),
            "n1",
            FacetBody::Note(NoteFacet::default()),
        );
        merge_note(&mut facet, &first).unwrap();
        merge_note(&mut facet, &second).unwrap();

        let note = facet.body.as_note().unwrap();
        prop_assert_eq!(&note.title, &second.title.clone().or(first.title.clone()));
        prop_assert_eq!(&note.content, &second.content.clone().or(first.content.clone()));
        prop_assert_eq!(note.created, second.created.or(first.created));
        prop_assert_eq!(
            &note.notebook_guid,
            &second.notebook_guid.clone().or(first.notebook_guid.clone())
        );
        let author = |n: &NotePayload| n.attributes.as_ref().and_then(|a| a.author.clone());
        prop_assert_eq!(&note.author, &author(&second).or(author(&first)));
    }
}
