//! Append-only journal behind [`crate::Database`].
//!
//! Every mutation of the facet or attribute state is appended as one framed
//! record before it is applied in memory. Opening a database replays the
//! journal from the start.
//!
//! ## Record format
//!
//! ```text
//! | magic (4) | version (2) | length (4) | CBOR payload (length) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC covers header and payload. A record
//! cut short by a crash (incomplete header or payload, or a bad CRC on the
//! final record) marks the end of the journal and is truncated away on open.
//! Anything else that fails to parse is corruption.

use crate::error::{CoreError, CoreResult};
use crate::facet::Facet;
use crate::types::{ConnectionId, FacetKind};
use fluxsync_storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Magic bytes opening every journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FXJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Insert or replace a facet.
    PutFacet(Facet),
    /// Delete one facet.
    DeleteFacet {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Facet kind.
        kind: FacetKind,
        /// Provider id of the facet.
        provider_id: String,
    },
    /// Delete every facet of a connection.
    EraseConnection(ConnectionId),
    /// Set an attribute.
    SetAttribute {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Attribute key.
        key: String,
        /// New value.
        value: String,
    },
    /// Remove an attribute.
    RemoveAttribute {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Attribute key.
        key: String,
    },
    /// Remove every attribute of a connection.
    RemoveAllAttributes(ConnectionId),
}

impl JournalRecord {
    /// Maximum encoded payload size; the length field is 4 bytes.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Encodes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails or the payload is too large.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(self, &mut payload)
            .map_err(|e| CoreError::codec(format!("failed to encode journal record: {e}")))?;
        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CoreError::codec(format!(
                "journal record too large: {} bytes",
                payload.len()
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn decode_payload(payload: &[u8], offset: u64) -> CoreResult<Self> {
        ciborium::de::from_reader(payload)
            .map_err(|e| CoreError::journal_corruption(offset, format!("undecodable record: {e}")))
    }
}

/// Outcome of scanning a journal image.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Records in append order.
    pub records: Vec<JournalRecord>,
    /// Length of the valid prefix.
    pub valid_len: u64,
}

/// Parses every complete record in `data`.
pub(crate) fn scan(data: &[u8]) -> CoreResult<Replay> {
    let mut replay = Replay::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let remaining = data.len() - pos;
        if remaining < HEADER_SIZE {
            break;
        }

        let header = &data[pos..pos + HEADER_SIZE];
        if header[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let payload_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if remaining < total_len {
            break;
        }

        let payload_end = pos + HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            data[payload_end],
            data[payload_end + 1],
            data[payload_end + 2],
            data[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&data[pos..payload_end]);
        if stored_crc != computed_crc {
            if pos + total_len == data.len() {
                break;
            }
            return Err(CoreError::journal_corruption(
                offset,
                format!("checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
            ));
        }

        let record = JournalRecord::decode_payload(&data[pos + HEADER_SIZE..payload_end], offset)?;
        replay.records.push(record);
        pos += total_len;
    }

    replay.valid_len = pos as u64;
    Ok(replay)
}

/// Journal writer over a storage backend.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    records: u64,
}

impl Journal {
    /// Opens a journal, replaying its contents and dropping a torn tail.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> CoreResult<(Self, Vec<JournalRecord>)> {
        let size = backend.size()?;
        let data = backend.read_at(0, size as usize)?;
        let replay = scan(&data)?;

        if replay.valid_len < size {
            tracing::warn!(
                valid_len = replay.valid_len,
                size,
                "dropping torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let journal = Self {
            backend,
            sync_on_write,
            records: replay.records.len() as u64,
        };
        Ok((journal, replay.records))
    }

    /// Appends records as one write.
    pub(crate) fn append(&mut self, records: &[JournalRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for record in records {
            buf.extend_from_slice(&record.encode()?);
        }
        self.backend.append(&buf)?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        self.records += records.len() as u64;
        Ok(())
    }

    /// Replaces the journal contents with `records` in place.
    pub(crate) fn rewrite(&mut self, records: &[JournalRecord]) -> CoreResult<()> {
        self.backend.truncate(0)?;
        self.records = 0;
        self.append(records)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Swaps in a backend that already holds `records` records.
    pub(crate) fn replace_backend(&mut self, backend: Box<dyn StorageBackend>, records: u64) {
        self.backend = backend;
        self.records = records;
    }

    /// Flushes everything appended so far.
    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Records in the journal, live or superseded.
    pub(crate) fn record_count(&self) -> u64 {
        self.records
    }

    /// Journal size in bytes.
    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::{FacetBody, TagFacet};
    use fluxsync_storage::InMemoryBackend;

    fn tag_record(id: &str) -> JournalRecord {
        JournalRecord::PutFacet(Facet::new(
            ConnectionId::new(3),
            id,
            FacetBody::Tag(TagFacet {
                name: Some(format!("tag {id}")),
                parent_guid: None,
            }),
        ))
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn scan_reads_back_appended_records() {
        let records = vec![
            tag_record("a"),
            JournalRecord::SetAttribute {
                connection_id: ConnectionId::new(3),
                key: "k".into(),
                value: "v".into(),
            },
            JournalRecord::EraseConnection(ConnectionId::new(3)),
        ];
        let mut data = Vec::new();
        for record in &records {
            data.extend_from_slice(&record.encode().unwrap());
        }

        let replay = scan(&data).unwrap();
        assert_eq!(replay.records, records);
        assert_eq!(replay.valid_len, data.len() as u64);
    }

    #[test]
    fn torn_tail_is_end_of_journal() {
        let first = tag_record("a").encode().unwrap();
        let second = tag_record("b").encode().unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second[..second.len() - 3]);

        let replay = scan(&data).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.valid_len, first.len() as u64);
    }

    #[test]
    fn bad_crc_on_last_record_is_torn_tail() {
        let first = tag_record("a").encode().unwrap();
        let mut second = tag_record("b").encode().unwrap();
        let last = second.len() - 1;
        second[last] ^= 0xFF;
        let mut data = first.clone();
        data.extend_from_slice(&second);

        let replay = scan(&data).unwrap();
        assert_eq!(replay.records.len(), 1);
    }

    #[test]
    fn bad_crc_mid_journal_is_corruption() {
        let mut first = tag_record("a").encode().unwrap();
        first[HEADER_SIZE] ^= 0xFF;
        let mut data = first;
        data.extend_from_slice(&tag_record("b").encode().unwrap());

        assert!(matches!(
            scan(&data),
            Err(CoreError::JournalCorruption { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut data = tag_record("a").encode().unwrap();
        data[0] = b'X';
        assert!(matches!(scan(&data), Err(CoreError::JournalCorruption { .. })));
    }

    #[test]
    fn open_truncates_torn_tail() {
        let backend = InMemoryBackend::new();
        let mut writer = backend.clone();
        let good = tag_record("a").encode().unwrap();
        writer.append(&good).unwrap();
        writer.append(&[0x46, 0x58]).unwrap();

        let (journal, records) = Journal::open(Box::new(backend), false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(journal.size().unwrap(), good.len() as u64);
        assert_eq!(journal.record_count(), 1);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let (mut journal, _) = Journal::open(Box::new(InMemoryBackend::new()), false).unwrap();
        journal
            .append(&[tag_record("a"), tag_record("b"), tag_record("c")])
            .unwrap();
        assert_eq!(journal.record_count(), 3);

        journal.rewrite(&[tag_record("c")]).unwrap();
        assert_eq!(journal.record_count(), 1);
        assert_eq!(
            journal.size().unwrap(),
            tag_record("c").encode().unwrap().len() as u64
        );
    }
}
