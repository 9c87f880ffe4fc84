//! Presence tracking: recognitions → entry/exit events.
//!
//! Each identity is either ABSENT (no `last_seen`) or PRESENT since `last_seen`.
//! A recognition while ABSENT is an entry. A recognition while PRESENT is an
//! exit once more than the debounce window has passed since `last_seen`;
//! earlier recognitions are ignored and do NOT refresh `last_seen`.
//! Identities that are simply not seen again never exit.

use crate::store::{AttendanceSink, EntryOutcome, ExitOutcome, StoreError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rollcall_core::Identity;
use std::collections::HashMap;

/// Default debounce window in seconds.
pub const DEFAULT_DEBOUNCE_SECS: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// Minimum time since the entry before a recognition counts as an exit.
    pub debounce: Duration,
    /// Whether a second entry/exit pair may be logged on the same day.
    pub allow_multiple_sessions: bool,
}

impl PresenceConfig {
    pub fn new(debounce_secs: u32, allow_multiple_sessions: bool) -> Self {
        Self {
            debounce: Duration::seconds(i64::from(debounce_secs)),
            allow_multiple_sessions,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_SECS, false)
    }
}

/// What a single recognition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// ABSENT → PRESENT, entry row written or an open row for today taken over.
    Entry,
    /// PRESENT → ABSENT, exit requested from the store.
    Exit,
    /// PRESENT and still inside the debounce window.
    Ignored,
    /// ABSENT, but today's session was already logged.
    Suppressed,
}

#[derive(Debug, Clone, Default)]
struct PresenceState {
    last_seen: Option<NaiveDateTime>,
    last_entry_date: Option<NaiveDate>,
}

/// Per-identity presence state machine. State lives only in memory.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    config: PresenceConfig,
    states: HashMap<Identity, PresenceState>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Feed one recognition of `identity` at `now`, writing to `sink` on transitions.
    pub fn observe<S: AttendanceSink + ?Sized>(
        &mut self,
        identity: &Identity,
        now: NaiveDateTime,
        sink: &mut S,
    ) -> Result<PresenceEvent, StoreError> {
        let state = self.states.entry(identity.clone()).or_default();
        let date = now.date();

        match state.last_seen {
            Some(since) if now - since > self.config.debounce => {
                let outcome = sink.record_exit(identity, date, now.time())?;
                state.last_seen = None;
                match outcome {
                    ExitOutcome::Closed => {
                        tracing::info!(identity = %identity, time = %now.format("%H:%M:%S"), "exit logged");
                    }
                    ExitOutcome::NoOpenRecord => {
                        tracing::warn!(identity = %identity, %date, "exit with no open record for today");
                    }
                }
                Ok(PresenceEvent::Exit)
            }
            Some(_) => Ok(PresenceEvent::Ignored),
            None => {
                if !self.config.allow_multiple_sessions && state.last_entry_date == Some(date) {
                    return Ok(PresenceEvent::Suppressed);
                }

                match sink.record_entry(identity, date, now.time())? {
                    EntryOutcome::Recorded => {
                        state.last_seen = Some(now);
                        state.last_entry_date = Some(date);
                        tracing::info!(identity = %identity, time = %now.format("%H:%M:%S"), "entry logged");
                        Ok(PresenceEvent::Entry)
                    }
                    EntryOutcome::AlreadyOpen => {
                        state.last_seen = Some(now);
                        state.last_entry_date = Some(date);
                        tracing::info!(identity = %identity, %date, "resuming open attendance row");
                        Ok(PresenceEvent::Entry)
                    }
                    EntryOutcome::Duplicate => {
                        state.last_entry_date = Some(date);
                        tracing::warn!(identity = %identity, %date, "attendance table already holds this session");
                        Ok(PresenceEvent::Suppressed)
                    }
                }
            }
        }
    }

    pub fn is_present(&self, identity: &Identity) -> bool {
        self.last_seen(identity).is_some()
    }

    pub fn last_seen(&self, identity: &Identity) -> Option<NaiveDateTime> {
        self.states.get(identity).and_then(|s| s.last_seen)
    }

    pub fn present_count(&self) -> usize {
        self.states.values().filter(|s| s.last_seen.is_some()).count()
    }
}
