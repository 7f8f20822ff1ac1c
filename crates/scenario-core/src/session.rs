//! The SIP collaborator seam
//!
//! The orchestrator never talks to a SIP stack directly. It drives a
//! [`SipSession`] implementation through commands and learns about everything
//! asynchronous (registration results, call state changes, received DTMF)
//! from typed [`SessionEvent`]s that the implementation posts into an
//! [`EventSink`]. The orchestrator owns the matching [`EventQueue`] and drains
//! it after every [`SipSession::poll`], so events are applied in the order
//! they were posted and only on the orchestrator's task.
//!
//! Routing is scoped to one run: the orchestrator hands its sink over with
//! [`SipSession::attach_events`] and takes it back with
//! [`SipSession::detach_events`] during cleanup.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::AccountConfig;
use crate::error::SessionResult;

/// Handle of a registered account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc-{}", self.0)
    }
}

/// Handle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Registration state of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Registering,
    Registered,
    Failed { code: u16, reason: String },
    Unregistered,
}

impl RegistrationState {
    /// Whether a registration attempt has concluded
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Registering)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registering => write!(f, "registering"),
            Self::Registered => write!(f, "registered"),
            Self::Failed { code, reason } => write!(f, "failed ({} {})", code, reason),
            Self::Unregistered => write!(f, "unregistered"),
        }
    }
}

/// Call state as reported by the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Outgoing INVITE sent
    Calling,
    /// Incoming INVITE not yet answered
    Incoming,
    /// Provisional response with media
    Early,
    /// Answered, waiting for ACK
    Connecting,
    Connected,
    Disconnected { code: u16 },
}

impl CallState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calling => write!(f, "calling"),
            Self::Incoming => write!(f, "incoming"),
            Self::Early => write!(f, "early"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected { code } => write!(f, "disconnected ({})", code),
        }
    }
}

/// Asynchronous notification from the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    RegistrationChanged {
        account: AccountId,
        state: RegistrationState,
    },
    IncomingCall {
        call: CallId,
        /// Account the call arrived on
        account: AccountId,
        from: String,
        to: String,
    },
    CallStateChanged {
        call: CallId,
        state: CallState,
    },
    ToneReceived {
        call: CallId,
        digit: char,
        duration_ms: u32,
    },
}

/// Producer half handed to the collaborator
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Post an event; returns false once the run has gone away
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the owning queue still exists
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Consumer half owned by one orchestrator run
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventQueue {
    /// Everything queued right now, in posting order
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a connected sink/queue pair
pub fn event_channel() -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventQueue { rx })
}

/// Commands the orchestrator issues to a SIP user agent.
///
/// Commands report immediate failures only; their outcome (a registration
/// result, a call being answered) arrives later as a [`SessionEvent`].
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use sipcheck_scenario_core::{
///     AccountConfig, AccountId, CallId, EventSink, SessionResult, SipSession,
/// };
///
/// struct Offline;
///
/// #[async_trait]
/// impl SipSession for Offline {
///     async fn initialize(&mut self) -> SessionResult<()> { Ok(()) }
///     fn attach_events(&mut self, _sink: EventSink) {}
///     fn detach_events(&mut self) {}
///     async fn register(&mut self, _account: &AccountConfig) -> SessionResult<AccountId> {
///         Ok(AccountId(0))
///     }
///     async fn unregister(&mut self, _account: AccountId) -> SessionResult<()> { Ok(()) }
///     async fn make_call(&mut self, _account: AccountId, _uri: &str) -> SessionResult<CallId> {
///         Ok(CallId(0))
///     }
///     async fn answer(&mut self, _call: CallId, _code: u16) -> SessionResult<()> { Ok(()) }
///     async fn hangup(&mut self, _call: CallId, _code: u16) -> SessionResult<()> { Ok(()) }
///     async fn send_tone(&mut self, _call: CallId, _digits: &str) -> SessionResult<()> { Ok(()) }
///     async fn play_file(&mut self, _call: CallId, _file: &Path, _looped: bool) -> SessionResult<()> {
///         Ok(())
///     }
///     async fn start_recording(&mut self, _call: CallId, _file: &Path) -> SessionResult<()> {
///         Ok(())
///     }
///     async fn poll(&mut self, max_wait: Duration) -> SessionResult<()> {
///         tokio::time::sleep(max_wait).await;
///         Ok(())
///     }
///     async fn shutdown(&mut self) -> SessionResult<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait SipSession: Send {
    /// Start the user agent
    async fn initialize(&mut self) -> SessionResult<()>;

    /// Route events for this run into `sink`
    fn attach_events(&mut self, sink: EventSink);

    /// Stop routing events; later events are dropped
    fn detach_events(&mut self);

    /// Begin registering an account
    async fn register(&mut self, account: &AccountConfig) -> SessionResult<AccountId>;

    async fn unregister(&mut self, account: AccountId) -> SessionResult<()>;

    /// Place a call from `account` to `uri`
    async fn make_call(&mut self, account: AccountId, uri: &str) -> SessionResult<CallId>;

    /// Answer an incoming call with a final status code
    async fn answer(&mut self, call: CallId, code: u16) -> SessionResult<()>;

    async fn hangup(&mut self, call: CallId, code: u16) -> SessionResult<()>;

    /// Send DTMF digits
    async fn send_tone(&mut self, call: CallId, digits: &str) -> SessionResult<()>;

    async fn play_file(&mut self, call: CallId, file: &Path, looped: bool) -> SessionResult<()>;

    /// Record the call's incoming audio as 16-bit PCM WAV
    async fn start_recording(&mut self, call: CallId, file: &Path) -> SessionResult<()>;

    /// Process network activity for at most `max_wait`, posting any resulting events
    async fn poll(&mut self, max_wait: Duration) -> SessionResult<()>;

    /// Release the user agent
    async fn shutdown(&mut self) -> SessionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_posting_order() {
        let (sink, mut queue) = event_channel();
        assert!(sink.post(SessionEvent::CallStateChanged {
            call: CallId(1),
            state: CallState::Calling,
        }));
        assert!(sink.post(SessionEvent::ToneReceived {
            call: CallId(1),
            digit: '5',
            duration_ms: 100,
        }));

        let events = queue.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::CallStateChanged { .. }));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_sink_reports_dropped_queue() {
        let (sink, queue) = event_channel();
        assert!(sink.is_open());
        drop(queue);
        assert!(!sink.is_open());
        assert!(!sink.post(SessionEvent::CallStateChanged {
            call: CallId(1),
            state: CallState::Connected,
        }));
    }

    #[test]
    fn test_state_predicates() {
        assert!(!RegistrationState::Registering.is_settled());
        assert!(RegistrationState::Failed {
            code: 403,
            reason: "Forbidden".into()
        }
        .is_settled());
        assert!(CallState::Disconnected { code: 486 }.is_terminated());
        assert!(CallState::Connected.is_connected());
    }
}
