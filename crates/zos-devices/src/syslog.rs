//! Device syscall audit log
//!
//! Records every device syscall (request + response) with the caller and
//! the time it was seen. Bounded: the oldest events are dropped first.

use serde::{Deserialize, Serialize};
use zos_hal::ProcessId;

/// Monotonic event identifier
pub type EventId = u64;

/// A system event (syscall request or response).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysEvent {
    /// Unique event ID (monotonic)
    pub id: EventId,
    /// Process that made the syscall
    pub sender: u64,
    /// Timestamp (micros since boot)
    pub timestamp: u64,
    /// Event type (request or response)
    pub event_type: SysEventType,
}

/// Type of system event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysEventType {
    /// Syscall request from a process
    Request {
        /// Syscall number
        syscall_num: u32,
        /// Syscall arguments (up to 4)
        args: [u32; 4],
    },
    /// Syscall response to a process
    Response {
        /// ID of the request this responds to
        request_id: EventId,
        /// Syscall result (negative = error)
        result: i64,
    },
}

/// Maximum number of events to keep in memory
pub const MAX_SYSLOG_EVENTS: usize = 4096;

/// Append-only syscall event log.
#[derive(Debug, Default)]
pub struct SysLog {
    events: Vec<SysEvent>,
    next_id: EventId,
}

impl SysLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a syscall request.
    ///
    /// Returns the event ID for correlating with the response.
    pub fn log_request(
        &mut self,
        sender: ProcessId,
        syscall_num: u32,
        args: [u32; 4],
        timestamp: u64,
    ) -> EventId {
        self.push(sender, timestamp, SysEventType::Request { syscall_num, args })
    }

    /// Log a syscall response.
    pub fn log_response(
        &mut self,
        sender: ProcessId,
        request_id: EventId,
        result: i64,
        timestamp: u64,
    ) {
        self.push(sender, timestamp, SysEventType::Response { request_id, result });
    }

    fn push(&mut self, sender: ProcessId, timestamp: u64, event_type: SysEventType) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(SysEvent {
            id,
            sender: sender.0,
            timestamp,
            event_type,
        });
        if self.events.len() > MAX_SYSLOG_EVENTS {
            let excess = self.events.len() - MAX_SYSLOG_EVENTS;
            self.events.drain(0..excess);
        }
        id
    }

    pub fn events(&self) -> &[SysEvent] {
        &self.events
    }

    /// Events with `start_id <= id < end_id`
    pub fn get_range(&self, start_id: EventId, end_id: EventId) -> Vec<&SysEvent> {
        self.events
            .iter()
            .filter(|e| e.id >= start_id && e.id < end_id)
            .collect()
    }

    /// The most recent `count` events, newest first
    pub fn get_recent(&self, count: usize) -> Vec<&SysEvent> {
        self.events.iter().rev().take(count).collect()
    }

    /// The response logged for `request_id`, if any
    pub fn response_to(&self, request_id: EventId) -> Option<i64> {
        self.events.iter().find_map(|e| match e.event_type {
            SysEventType::Response { request_id: r, result } if r == request_id => Some(result),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn next_id(&self) -> EventId {
        self.next_id
    }
}
