//! LMDB-backed request journal

use crate::{JournalEntry, JournalError, RequestEvent, RequestId, RequestJournal};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const DB_NAME: &str = "request_journal";
const MAP_SIZE: usize = 64 * 1024 * 1024;

/// Journal persisted in LMDB.
///
/// Keys are `request_id (u64 BE) ++ sequence (u64 BE)` so a prefix scan on
/// the request ID yields its history in append order. Values are JSON.
pub struct HeedJournal {
    env: Env,
    db: Database<Bytes, Bytes>,
    counter: AtomicU64,
}

fn storage(e: impl std::fmt::Display) -> JournalError {
    JournalError::Storage(e.to_string().into())
}

fn key(request_id: RequestId, sequence: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&request_id.0.to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

fn split_key(raw: &[u8]) -> Option<(u64, u64)> {
    let id: [u8; 8] = raw.get(..8)?.try_into().ok()?;
    let seq: [u8; 8] = raw.get(8..16)?.try_into().ok()?;
    Some((u64::from_be_bytes(id), u64::from_be_bytes(seq)))
}

impl HeedJournal {
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        std::fs::create_dir_all(path).map_err(storage)?;
        // SAFETY: the environment directory is owned by this journal and not
        // opened twice in the same process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(1)
                .open(path)
        }
        .map_err(storage)?;

        let mut wtxn = env.write_txn().map_err(storage)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(DB_NAME))
            .map_err(storage)?;
        wtxn.commit().map_err(storage)?;

        let mut last_seq = 0;
        {
            let rtxn = env.read_txn().map_err(storage)?;
            for item in db.iter(&rtxn).map_err(storage)? {
                let (raw_key, _) = item.map_err(storage)?;
                if let Some((_, seq)) = split_key(raw_key) {
                    last_seq = last_seq.max(seq);
                }
            }
        }

        Ok(Self {
            env,
            db,
            counter: AtomicU64::new(last_seq + 1),
        })
    }
}

impl RequestJournal for HeedJournal {
    fn append(
        &self,
        request_id: RequestId,
        event: RequestEvent,
        recorded_at_millis: u64,
    ) -> Result<u64, JournalError> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis,
            event,
        };
        let value = serde_json::to_vec(&entry).map_err(storage)?;

        let mut wtxn = self.env.write_txn().map_err(storage)?;
        self.db
            .put(&mut wtxn, &key(request_id, seq)[..], &value[..])
            .map_err(storage)?;
        wtxn.commit().map_err(storage)?;
        Ok(seq)
    }

    fn read(&self, request_id: RequestId) -> Result<Vec<JournalEntry>, JournalError> {
        let rtxn = self.env.read_txn().map_err(storage)?;
        let prefix = request_id.0.to_be_bytes();
        let mut entries = Vec::new();
        for item in self.db.prefix_iter(&rtxn, &prefix[..]).map_err(storage)? {
            let (_, raw) = item.map_err(storage)?;
            entries.push(serde_json::from_slice(raw).map_err(storage)?);
        }
        Ok(entries)
    }

    fn list_requests(&self) -> Result<Vec<RequestId>, JournalError> {
        let rtxn = self.env.read_txn().map_err(storage)?;
        let mut ids = Vec::new();
        for item in self.db.iter(&rtxn).map_err(storage)? {
            let (raw_key, _) = item.map_err(storage)?;
            if let Some((id, _)) = split_key(raw_key) {
                if ids.last() != Some(&RequestId::new(id)) {
                    ids.push(RequestId::new(id));
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{unresolved_requests, AccountId, EngineKind, RescuePath};
    use rust_decimal_macros::dec;

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = HeedJournal::open(dir.path()).unwrap();
            for id in [1, 2] {
                journal
                    .append(
                        RequestId::new(id),
                        RequestEvent::Submitted {
                            owner: AccountId::from("alice"),
                            engine: EngineKind::Algorithmic,
                            value: dec!(4000),
                            submitted_at_millis: 0,
                        },
                        0,
                    )
                    .unwrap();
            }
            journal
                .append(
                    RequestId::new(1),
                    RequestEvent::Rescued {
                        path: RescuePath::Owner,
                        rescued_at_millis: 10,
                    },
                    10,
                )
                .unwrap();
        }

        let journal = HeedJournal::open(dir.path()).unwrap();
        assert_eq!(journal.read(RequestId::new(1)).unwrap().len(), 2);
        assert_eq!(
            journal.list_requests().unwrap(),
            vec![RequestId::new(1), RequestId::new(2)]
        );
        assert_eq!(unresolved_requests(&journal).unwrap(), vec![RequestId::new(2)]);

        let seq = journal
            .append(RequestId::new(3), RequestEvent::Deferred { deferred_at_millis: 1 }, 1)
            .unwrap();
        assert_eq!(seq, 4);
    }
}
