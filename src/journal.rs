//! Request journal storage trait

use super::{RequestEvent, RequestId};
use serde::{Deserialize, Serialize};

/// Journal storage trait
pub trait RequestJournal: Send + Sync + 'static {
    /// Append `event`, stamped with the caller's clock reading
    fn append(
        &self,
        request_id: RequestId,
        event: RequestEvent,
        recorded_at_millis: u64,
    ) -> Result<u64, JournalError>;
    fn read(&self, request_id: RequestId) -> Result<Vec<JournalEntry>, JournalError>;
    fn list_requests(&self) -> Result<Vec<RequestId>, JournalError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub recorded_at_millis: u64,
    pub event: RequestEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    #[error("Not found: {0}")]
    NotFound(RequestId),
}

/// In-memory journal
pub struct InMemoryJournal {
    data: std::sync::RwLock<std::collections::HashMap<u64, Vec<JournalEntry>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(std::collections::HashMap::new()),
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl RequestJournal for InMemoryJournal {
    fn append(
        &self,
        request_id: RequestId,
        event: RequestEvent,
        recorded_at_millis: u64,
    ) -> Result<u64, JournalError> {
        let seq = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis,
            event,
        };

        let mut data = self.data.write().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        data.entry(request_id.0).or_default().push(entry);

        Ok(seq)
    }

    fn read(&self, request_id: RequestId) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.get(&request_id.0).cloned().unwrap_or_default())
    }

    fn list_requests(&self) -> Result<Vec<RequestId>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        let mut ids: Vec<_> = data.keys().map(|&id| RequestId::new(id)).collect();
        ids.sort();
        Ok(ids)
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests whose history has a submission but no terminal event.
///
/// Used after a restart to find positions that still need the ladder.
pub fn unresolved_requests(journal: &dyn RequestJournal) -> Result<Vec<RequestId>, JournalError> {
    let mut unresolved = Vec::new();
    for request_id in journal.list_requests()? {
        let entries = journal.read(request_id)?;
        if rebuild_state(&entries) == RebuiltState::Open {
            unresolved.push(request_id);
        }
    }
    Ok(unresolved)
}

/// Rebuild state from event history
fn rebuild_state(entries: &[JournalEntry]) -> RebuiltState {
    let mut state = RebuiltState::Unknown;

    for entry in entries {
        state = match (state, &entry.event) {
            (RebuiltState::Resolved, _) => RebuiltState::Resolved,
            (_, event) if event.is_terminal() => RebuiltState::Resolved,
            (_, RequestEvent::Submitted { .. }) => RebuiltState::Open,
            _ => state,
        };
    }

    state
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RebuiltState {
    Unknown,
    Open,
    Resolved,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountId, EngineKind, RescuePath};
    use rust_decimal_macros::dec;

    fn submitted() -> RequestEvent {
        RequestEvent::Submitted {
            owner: AccountId::from("alice"),
            engine: EngineKind::Algorithmic,
            value: dec!(4000),
            submitted_at_millis: 0,
        }
    }

    #[test]
    fn test_append_and_read_in_order() {
        let journal = InMemoryJournal::new();
        let id = RequestId::new(1);
        let a = journal.append(id, submitted(), 0).unwrap();
        let b = journal
            .append(id, RequestEvent::Deferred { deferred_at_millis: 1 }, 1)
            .unwrap();
        assert!(b > a);

        let entries = journal.read(id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event.event_type(), "deferred");
        assert_eq!(entries[1].recorded_at_millis, 1);
        assert!(journal.read(RequestId::new(99)).unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_requests_skips_terminal_histories() {
        let journal = InMemoryJournal::new();
        journal.append(RequestId::new(1), submitted(), 0).unwrap();
        journal
            .append(
                RequestId::new(1),
                RequestEvent::Rescued {
                    path: RescuePath::Owner,
                    rescued_at_millis: 5,
                },
                5,
            )
            .unwrap();
        journal.append(RequestId::new(2), submitted(), 0).unwrap();
        journal
            .append(
                RequestId::new(2),
                RequestEvent::DispatchFailed {
                    attempt: 1,
                    error: "timeout".into(),
                    failed_at_millis: 3,
                },
                3,
            )
            .unwrap();

        assert_eq!(unresolved_requests(&journal).unwrap(), vec![RequestId::new(2)]);
    }
}
