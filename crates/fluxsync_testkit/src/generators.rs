//! Property-based test generators using proptest.
//!
//! Provides strategies for provider payloads, including sparse ones where
//! most fields are absent, and for sequences of account edits.

use crate::account::ScriptedAccount;
use fluxsync_protocol::{
    DataBody, NoteAttributes, NotePayload, NotebookPayload, ResourceAttributes, ResourcePayload,
    TagPayload,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for generating provider guids.
pub fn guid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f0-9]{8}-[a-f0-9]{4}").expect("Invalid regex")
}

fn text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 ]{1,24}").expect("Invalid regex")
}

fn millis() -> impl Strategy<Value = i64> {
    1_000_000_000_000i64..2_000_000_000_000i64
}

/// Strategy for tag payloads. Every field but the guid may be absent.
pub fn tag_payload_strategy() -> impl Strategy<Value = TagPayload> {
    (
        guid_strategy(),
        prop::option::of(text()),
        prop::option::of(guid_strategy()),
    )
        .prop_map(|(guid, name, parent_guid)| TagPayload {
            guid: Some(guid),
            name,
            parent_guid,
            ..TagPayload::default()
        })
}

/// Strategy for notebook payloads. Every field but the guid may be absent.
pub fn notebook_payload_strategy() -> impl Strategy<Value = NotebookPayload> {
    (
        guid_strategy(),
        prop::option::of(text()),
        prop::option::of(any::<bool>()),
        prop::option::of(millis()),
        prop::option::of(text()),
    )
        .prop_map(
            |(guid, name, default_notebook, service_created, stack)| NotebookPayload {
                guid: Some(guid),
                name,
                default_notebook,
                service_created,
                stack,
                ..NotebookPayload::default()
            },
        )
}

/// Strategy for note attributes, possibly carrying a geotag.
pub fn note_attributes_strategy() -> impl Strategy<Value = NoteAttributes> {
    (
        prop::option::of(-90.0f64..90.0),
        prop::option::of(-180.0f64..180.0),
        prop::option::of(text()),
        prop::option::of(text()),
    )
        .prop_map(|(latitude, longitude, author, place_name)| NoteAttributes {
            latitude,
            longitude,
            author,
            place_name,
            ..NoteAttributes::default()
        })
}

/// Strategy for notes without resources. Every field but the guid may be
/// absent.
pub fn note_payload_strategy() -> impl Strategy<Value = NotePayload> {
    (
        guid_strategy(),
        prop::option::of(text()),
        prop::option::of(text()),
        prop::option::of(millis()),
        prop::option::of(millis()),
        prop::option::of(any::<bool>()),
        prop::option::of(guid_strategy()),
        prop::option::of(note_attributes_strategy()),
    )
        .prop_map(
            |(guid, title, content, created, updated, active, notebook_guid, attributes)| {
                NotePayload {
                    guid: Some(guid),
                    title,
                    content,
                    created,
                    updated,
                    active,
                    notebook_guid,
                    attributes,
                    ..NotePayload::default()
                }
            },
        )
}

/// Strategy for binary bodies.
pub fn data_body_strategy() -> impl Strategy<Value = DataBody> {
    prop::collection::vec(any::<u8>(), 1..256).prop_map(|body| DataBody {
        size: i32::try_from(body.len()).ok(),
        body_hash: Some(body.iter().rev().take(16).copied().collect()),
        body: Some(body),
    })
}

/// Strategy for resources of `note_guid`. Every field but the guid and the
/// parent may be absent.
pub fn resource_payload_strategy(note_guid: String) -> impl Strategy<Value = ResourcePayload> {
    (
        guid_strategy(),
        prop::option::of(prop::sample::select(vec![
            "image/png",
            "image/jpeg",
            "application/pdf",
            "audio/wav",
        ])),
        prop::option::of(data_body_strategy()),
        prop::option::of(data_body_strategy()),
        prop::option::of(millis()),
    )
        .prop_map(move |(guid, mime, data, recognition, timestamp)| ResourcePayload {
            guid: Some(guid),
            note_guid: Some(note_guid.clone()),
            mime: mime.map(str::to_string),
            data,
            recognition,
            attributes: timestamp.map(|timestamp| ResourceAttributes {
                timestamp: Some(timestamp),
                ..ResourceAttributes::default()
            }),
            ..ResourcePayload::default()
        })
}

/// One edit to a [`ScriptedAccount`], or a sync point.
///
/// Guids come from small pools so edits collide often.
#[derive(Debug, Clone)]
pub enum AccountOperation {
    /// Create or rename a tag.
    PutTag {
        /// Tag guid.
        guid: String,
        /// New name.
        name: String,
    },
    /// Create or rename a notebook.
    PutNotebook {
        /// Notebook guid.
        guid: String,
        /// New name.
        name: String,
    },
    /// Create or edit a note.
    PutNote {
        /// Note guid.
        guid: String,
        /// Notebook the note is filed in.
        notebook: String,
        /// New title.
        title: String,
    },
    /// Expunge a note.
    ExpungeNote(String),
    /// Expunge a notebook and its notes.
    ExpungeNotebook(String),
    /// Expunge a tag.
    ExpungeTag(String),
    /// Run a sync cycle.
    Sync,
}

/// Strategy for a single account operation.
pub fn account_operation_strategy() -> impl Strategy<Value = AccountOperation> {
    let tag = (0..4u8).prop_map(|i| format!("t{i}"));
    let notebook = (0..3u8).prop_map(|i| format!("b{i}"));
    let note = (0..6u8).prop_map(|i| format!("n{i}"));

    prop_oneof![
        3 => (tag.clone(), text()).prop_map(|(guid, name)| AccountOperation::PutTag { guid, name }),
        3 => (notebook.clone(), text())
            .prop_map(|(guid, name)| AccountOperation::PutNotebook { guid, name }),
        5 => (note.clone(), notebook.clone(), text()).prop_map(|(guid, notebook, title)| {
            AccountOperation::PutNote {
                guid,
                notebook,
                title,
            }
        }),
        1 => note.prop_map(AccountOperation::ExpungeNote),
        1 => notebook.prop_map(AccountOperation::ExpungeNotebook),
        1 => tag.prop_map(AccountOperation::ExpungeTag),
        2 => Just(AccountOperation::Sync),
    ]
}

/// Strategy for a sequence of account operations.
pub fn account_operations_strategy(
    max_len: usize,
) -> impl Strategy<Value = Vec<AccountOperation>> {
    prop::collection::vec(account_operation_strategy(), 1..max_len.max(2))
}

/// Applies operations to an account, calling `sync` at every sync point.
///
/// Expunged guids are never reused: operations touching them are skipped,
/// as a provider never hands out an expunged guid again. Notes stay in the
/// notebook they were first filed in.
pub fn apply_operations(
    account: &ScriptedAccount,
    operations: &[AccountOperation],
    mut sync: impl FnMut(),
) {
    let mut retired: BTreeSet<String> = BTreeSet::new();
    let mut homes: BTreeMap<String, String> = BTreeMap::new();
    for operation in operations {
        match operation {
            AccountOperation::PutTag { guid, name } if !retired.contains(guid) => {
                account.put_tag(guid, name);
            }
            AccountOperation::PutNotebook { guid, name } if !retired.contains(guid) => {
                account.put_notebook(guid, name);
            }
            AccountOperation::PutNote {
                guid,
                notebook,
                title,
            } if !retired.contains(guid) => {
                let home = homes.entry(guid.clone()).or_insert_with(|| notebook.clone());
                if retired.contains(home.as_str()) {
                    continue;
                }
                account.put_note(NotePayload {
                    guid: Some(guid.clone()),
                    notebook_guid: Some(home.clone()),
                    title: Some(title.clone()),
                    content: Some(format!("<en-note>{title}</en-note>")),
                    ..NotePayload::default()
                });
            }
            AccountOperation::ExpungeNote(guid)
            | AccountOperation::ExpungeNotebook(guid)
            | AccountOperation::ExpungeTag(guid)
                if retired.contains(guid) => {}
            AccountOperation::ExpungeNote(guid) => {
                account.expunge_note(guid);
                retired.insert(guid.clone());
            }
            AccountOperation::ExpungeNotebook(guid) => {
                account.expunge_notebook(guid);
                retired.insert(guid.clone());
            }
            AccountOperation::ExpungeTag(guid) => {
                account.expunge_tag(guid);
                retired.insert(guid.clone());
            }
            AccountOperation::Sync => sync(),
            AccountOperation::PutTag { .. }
            | AccountOperation::PutNotebook { .. }
            | AccountOperation::PutNote { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_core::ManualClock;

    proptest! {
        #[test]
        fn generated_payloads_have_guids(
            tag in tag_payload_strategy(),
            note in note_payload_strategy(),
        ) {
            prop_assert!(tag.require_guid().is_ok());
            prop_assert!(note.require_guid().is_ok());
        }

        #[test]
        fn resources_point_at_their_note(resource in resource_payload_strategy("n1".into())) {
            prop_assert_eq!(resource.note_guid.as_deref(), Some("n1"));
        }
    }

    #[test]
    fn retired_guids_are_not_reused() {
        let account = ScriptedAccount::new(ManualClock::new(0));
        let operations = vec![
            AccountOperation::PutTag {
                guid: "t0".into(),
                name: "a".into(),
            },
            AccountOperation::ExpungeTag("t0".into()),
            AccountOperation::PutTag {
                guid: "t0".into(),
                name: "b".into(),
            },
            AccountOperation::ExpungeTag("t0".into()),
            AccountOperation::Sync,
        ];
        let mut syncs = 0;
        apply_operations(&account, &operations, || syncs += 1);
        assert_eq!(account.update_count(), 2);
        assert_eq!(syncs, 1);
    }
}
