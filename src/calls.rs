//! Live call registry.
//!
//! An insertion-ordered collection of call records keyed by the engine's
//! opaque call handle. Transient — never persisted. A record exists exactly
//! from the `Incoming` announcement until `Closed` removes it; `Ringing` and
//! mute changes are observed signals, not stored states.

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::CallId;

/// Stored call states. `Closed` is not a stored state — closing removes the
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallState {
    Incoming,
    Established,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub peer: String,
    pub state: CallState,
}

#[derive(Default)]
pub struct CallRegistry {
    records: Vec<(CallId, CallRecord)>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce an incoming call. Replaces any stale record under the same
    /// handle (the engine only reuses a handle after its record was removed,
    /// so a collision here means we missed the close).
    pub fn on_incoming(&mut self, id: CallId, peer: String) {
        self.records.retain(|(k, _)| *k != id);
        self.records.push((
            id,
            CallRecord {
                peer,
                state: CallState::Incoming,
            },
        ));
    }

    /// Transition a call to `Established` in place. An unknown handle means
    /// the engine reported progress for a call we never saw incoming; a
    /// minimal record is created defensively rather than dropping the call
    /// from view.
    pub fn on_established(&mut self, id: CallId) {
        match self.records.iter_mut().find(|(k, _)| *k == id) {
            Some((_, record)) => record.state = CallState::Established,
            None => {
                tracing::warn!(call = %id, "Established for unknown call handle");
                self.records.push((
                    id,
                    CallRecord {
                        peer: String::new(),
                        state: CallState::Established,
                    },
                ));
            }
        }
    }

    /// Remove a closed call. Absent handles are a no-op — close events may
    /// race an already-removed record. Returns whether a record was removed.
    pub fn on_closed(&mut self, id: CallId) -> bool {
        let before = self.records.len();
        self.records.retain(|(k, _)| *k != id);
        self.records.len() != before
    }

    pub fn get(&self, id: CallId) -> Option<&CallRecord> {
        self.records
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full-registry document: a JSON object keyed by the hex call handle,
    /// each value `{"peer": ..., "state": ...}`.
    pub fn snapshot(&self) -> Value {
        let mut doc = serde_json::Map::new();
        for (id, record) in &self.records {
            doc.insert(id.to_string(), json!(record));
        }
        Value::Object(doc)
    }
}
