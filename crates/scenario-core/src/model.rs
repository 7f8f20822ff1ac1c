//! Test definition and result types
//!
//! A [`TestDefinition`] scripts two roles, a caller and a receiver, each with
//! an ordered list of [`Action`]s, plus the [`Expectations`] the run is judged
//! against. Running a definition produces exactly one [`TestResult`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default overall timeout of a test
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 60;
/// Default per-role timeout
pub const DEFAULT_ROLE_TIMEOUT_SECS: u64 = 30;
/// Default hangup status code
pub const DEFAULT_HANGUP_CODE: u16 = 200;

/// One scripted step of a role
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Keep the call up for a while, still processing SIP events
    Wait { seconds: f64 },

    /// Send DTMF digits on the role's call
    SendDtmf {
        digits: String,
        #[serde(rename = "timeout")]
        timeout_secs: u64,
    },

    /// Expect the role's call to have received digits starting with `pattern`
    ExpectDtmf {
        pattern: String,
        #[serde(rename = "timeout")]
        timeout_secs: u64,
    },

    /// Play a file into the call
    PlayAudio {
        file: PathBuf,
        #[serde(rename = "loop")]
        looped: bool,
    },

    /// Record the call's incoming audio to a file
    RecordAudio { file: PathBuf },

    /// Expect `count` beeps in the receiver's recording
    ExpectBeeps { count: u32, frequency: f64 },

    /// End the call with a status code
    Hangup { code: u16 },
}

/// Discriminant of an [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Wait,
    SendDtmf,
    ExpectDtmf,
    PlayAudio,
    RecordAudio,
    ExpectBeeps,
    Hangup,
}

impl ActionKind {
    /// Name used in test documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::SendDtmf => "send_dtmf",
            Self::ExpectDtmf => "expect_dtmf",
            Self::PlayAudio => "play_audio",
            Self::RecordAudio => "record_audio",
            Self::ExpectBeeps => "expect_beeps",
            Self::Hangup => "hangup",
        }
    }

    /// Parse a document name, accepting the short `play`/`record` aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "wait" => Some(Self::Wait),
            "send_dtmf" => Some(Self::SendDtmf),
            "expect_dtmf" => Some(Self::ExpectDtmf),
            "play_audio" | "play" => Some(Self::PlayAudio),
            "record_audio" | "record" => Some(Self::RecordAudio),
            "expect_beeps" => Some(Self::ExpectBeeps),
            "hangup" => Some(Self::Hangup),
            _ => None,
        }
    }

    /// Whether the action only records an expectation for evaluation
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::ExpectDtmf | Self::ExpectBeeps)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Wait { .. } => ActionKind::Wait,
            Self::SendDtmf { .. } => ActionKind::SendDtmf,
            Self::ExpectDtmf { .. } => ActionKind::ExpectDtmf,
            Self::PlayAudio { .. } => ActionKind::PlayAudio,
            Self::RecordAudio { .. } => ActionKind::RecordAudio,
            Self::ExpectBeeps { .. } => ActionKind::ExpectBeeps,
            Self::Hangup { .. } => ActionKind::Hangup,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait { seconds } => write!(f, "wait {:.2}s", seconds),
            Self::SendDtmf { digits, .. } => write!(f, "send_dtmf '{}'", digits),
            Self::ExpectDtmf { pattern, .. } => write!(f, "expect_dtmf '{}'", pattern),
            Self::PlayAudio { file, looped } => {
                write!(f, "play_audio {}{}", file.display(), if *looped { " (loop)" } else { "" })
            }
            Self::RecordAudio { file } => write!(f, "record_audio {}", file.display()),
            Self::ExpectBeeps { count, frequency } => {
                if *frequency > 0.0 {
                    write!(f, "expect_beeps {} @ {:.0} Hz", count, frequency)
                } else {
                    write!(f, "expect_beeps {}", count)
                }
            }
            Self::Hangup { code } => write!(f, "hangup {}", code),
        }
    }
}

/// The two scripted parties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => f.write_str("caller"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Configuration of one role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleConfig {
    /// Account id, resolved against the engine configuration
    pub account: String,
    /// Destination URI (caller only)
    pub uri: String,
    /// Answer incoming calls automatically (receiver only)
    pub auto_answer: bool,
    /// How long the role waits for its call to connect
    pub timeout_secs: u64,
    pub actions: Vec<Action>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            uri: String::new(),
            auto_answer: false,
            timeout_secs: DEFAULT_ROLE_TIMEOUT_SECS,
            actions: Vec::new(),
        }
    }
}

impl RoleConfig {
    /// First `record_audio` target of this role
    pub fn recording_path(&self) -> Option<&Path> {
        self.actions
            .iter()
            .find_map(|action| match action {
                Action::RecordAudio { file } => Some(file.as_path()),
                _ => None,
            })
            .filter(|file| !file.as_os_str().is_empty())
    }

    /// `(count, frequency)` of each `expect_beeps` action of this role
    pub fn beep_expectations(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.actions.iter().filter_map(|action| match action {
            Action::ExpectBeeps { count, frequency } => Some((*count, *frequency)),
            _ => None,
        })
    }
}

/// Expected outcome of the whole test
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Expectations {
    pub connected: bool,
    /// 0 disables the beep check
    pub beep_count: u32,
    /// 0 accepts beeps at any frequency
    pub beep_frequency: f64,
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            connected: true,
            beep_count: 0,
            beep_frequency: 0.0,
        }
    }
}

/// A complete two-party scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestDefinition {
    pub name: String,
    pub description: String,
    /// Upper bound for the whole run
    pub timeout_secs: u64,
    pub caller: RoleConfig,
    pub receiver: RoleConfig,
    pub expect: Expectations,
}

impl Default for TestDefinition {
    fn default() -> Self {
        Self {
            name: "Unnamed Test".to_string(),
            description: String::new(),
            timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            caller: RoleConfig::default(),
            receiver: RoleConfig::default(),
            expect: Expectations::default(),
        }
    }
}

impl TestDefinition {
    pub fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Caller => &self.caller,
            Role::Receiver => &self.receiver,
        }
    }

    /// Whether any check needs the receiver's recording
    pub fn needs_beep_analysis(&self) -> bool {
        self.expect.beep_count > 0
            || self.caller.beep_expectations().next().is_some()
            || self.receiver.beep_expectations().next().is_some()
    }

    /// Problems a run would trip over, without rejecting the document
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.caller.account.is_empty() {
            warnings.push("caller has no account".to_string());
        }
        if self.receiver.account.is_empty() {
            warnings.push("receiver has no account".to_string());
        }
        if self.caller.uri.is_empty() {
            warnings.push("caller has no destination uri".to_string());
        }
        if !self.receiver.auto_answer {
            warnings.push("receiver does not auto-answer; the call can only connect if answered elsewhere".to_string());
        }
        if self.needs_beep_analysis() && self.receiver.recording_path().is_none() {
            warnings.push("beeps are expected but the receiver never records".to_string());
        }
        if self.caller.recording_path().is_some() && self.needs_beep_analysis() {
            warnings.push("only the receiver's recording is analysed for beeps".to_string());
        }

        warnings
    }
}

/// Lifecycle of a [`TestResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Timeout,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Timeout | Self::Error)
    }

    /// Transitions only move forward: pending, running, then one terminal state
    pub fn can_transition_to(&self, next: TestStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration_secs: f64,
    pub connected: bool,
    /// Digits received by the receiver's call
    pub dtmf_received: String,
    pub beeps_detected: usize,
    /// Frequency of the first detected beep, 0 if none
    pub beep_frequency: f64,
    /// Reason for anything other than `Passed`
    pub error_message: Option<String>,
}

impl TestResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Pending,
            duration_secs: 0.0,
            connected: false,
            dtmf_received: String::new(),
            beeps_detected: 0,
            beep_frequency: 0.0,
            error_message: None,
        }
    }

    /// Move to `next` if allowed; returns whether the status changed
    pub fn set_status(&mut self, next: TestStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Enter a terminal status with an optional reason
    pub fn conclude(&mut self, status: TestStatus, message: Option<String>) -> bool {
        if !status.is_terminal() || !self.set_status(status) {
            return false;
        }
        self.error_message = message;
        true
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    pub fn dtmf_received_count(&self) -> usize {
        self.dtmf_received.chars().count()
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}
