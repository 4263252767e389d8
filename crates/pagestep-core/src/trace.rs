//! Trace Recorder.
//!
//! Every trapped fault becomes one [`FaultEvent`]. The recorder reserves its
//! full capacity up front, so [`TraceRecorder::record`] never allocates while
//! running inside the fault handler.

use crate::error::{OracleError, Result};
use crate::page::Role;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// One trapped fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FaultEvent {
    /// The faulting address as reported by the platform
    pub address: usize,
    /// Number of faults recorded before this one
    pub index: usize,
    /// Role of the page the fault hit
    pub role: Role,
}

/// Ordered, read-only sequence of fault events of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Trace {
    events: Vec<FaultEvent>,
}

impl Trace {
    /// The recorded events in delivery order.
    pub fn events(&self) -> &[FaultEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if no fault was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The role tag of each event, in order. This is what the decoder consumes.
    pub fn roles(&self) -> Vec<Role> {
        self.events.iter().map(|e| e.role).collect()
    }

    /// Renders the trace as role tags, e.g. `P S P M P`.
    pub fn pattern(&self) -> String {
        self.events.iter().map(|e| e.role.tag()).join(" ")
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.len(), self.pattern())
    }
}

/// Append-only recorder with a fixed capacity.
#[derive(Debug)]
pub struct TraceRecorder {
    events: Vec<FaultEvent>,
    capacity: usize,
}

impl TraceRecorder {
    /// Creates a recorder holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends the next event.
    ///
    /// # Errors
    ///
    /// [`OracleError::TraceOverflow`] once `capacity` events were recorded.
    pub fn record(&mut self, address: usize, role: Role) -> Result<FaultEvent> {
        if self.events.len() >= self.capacity {
            return Err(OracleError::TraceOverflow {
                capacity: self.capacity,
                address,
            });
        }
        let event = FaultEvent {
            address,
            index: self.events.len(),
            role,
        };
        self.events.push(event);
        Ok(event)
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a copy of the full sequence.
    pub fn snapshot(&self) -> Trace {
        Trace {
            events: self.events.clone(),
        }
    }

    /// Drops all events, keeping the reserved storage.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_indexed_in_order() {
        let mut recorder = TraceRecorder::new(4);
        recorder.record(0x3000, Role::CodeModpow).expect("record");
        recorder.record(0x1000, Role::CodeSquare).expect("record");
        recorder.record(0x3008, Role::CodeModpow).expect("record");
        let trace = recorder.snapshot();
        assert_eq!(trace.len(), 3);
        assert_eq!(
            trace.events().iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(trace.pattern(), "P S P");
        assert_eq!(trace.to_string(), "[3] P S P");
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut recorder = TraceRecorder::new(1);
        recorder.record(0x1000, Role::Data).expect("record");
        assert!(matches!(
            recorder.record(0x1004, Role::Data),
            Err(OracleError::TraceOverflow {
                capacity: 1,
                address: 0x1004
            })
        ));
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut recorder = TraceRecorder::new(8);
        recorder.record(0x1000, Role::Data).expect("record");
        recorder.clear();
        assert!(recorder.is_empty());
        assert!(recorder.snapshot().is_empty());
        assert_eq!(recorder.capacity(), 8);
    }
}
