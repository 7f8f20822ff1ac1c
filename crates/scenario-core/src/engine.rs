//! Test orchestrator
//!
//! [`TestEngine`] runs one [`TestDefinition`] against a [`SipSession`] and
//! always produces exactly one [`TestResult`]. A run moves through
//! phases in order:
//!
//! 1. `Initializing`: resolve both accounts, start the session, register and
//!    wait for both registrations
//! 2. `Connecting`: place the call and wait for it to connect
//! 3. `Active`: run the receiver's actions, then the caller's, then settle
//! 4. `Evaluating`: check the connection, beeps in the receiver's recording,
//!    and every `expect_dtmf`
//!
//! Whatever the outcome, cleanup runs once: open calls are hung up, event
//! routing is detached, accounts are unregistered in reverse order and the
//! session is shut down.
//!
//! All waiting goes through [`SipSession::poll`] in slices of at most
//! [`POLL_SLICE`]. Between slices the engine applies queued events, checks the
//! overall deadline and the shutdown token.

use std::path::Path;
use std::time::Duration;

use sipcheck_analysis_core::{analyze_file, segment_frames};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{AccountConfig, EngineConfig};
use crate::dtmf::{invalid_digits, DtmfBuffer};
use crate::error::ScenarioError;
use crate::model::{Action, Role, TestDefinition, TestResult, TestStatus, DEFAULT_HANGUP_CODE};
use crate::session::{
    event_channel, AccountId, CallId, CallState, EventQueue, EventSink, RegistrationState,
    SessionEvent, SipSession,
};

/// Longest single poll of the SIP session
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Status code used when answering incoming calls
const ANSWER_CODE: u16 = 200;

const ROLES: [Role; 2] = [Role::Caller, Role::Receiver];

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Initializing,
    Connecting,
    Active,
    Evaluating,
    Finished,
}

/// Why a run stopped short of passing
#[derive(Debug)]
enum Outcome {
    Failed(String),
    Timeout(String),
    Error(String),
}

impl Outcome {
    fn cancelled() -> Self {
        Self::Error("Test cancelled".to_string())
    }

    fn into_parts(self) -> (TestStatus, String) {
        match self {
            Self::Failed(msg) => (TestStatus::Failed, msg),
            Self::Timeout(msg) => (TestStatus::Timeout, msg),
            Self::Error(msg) => (TestStatus::Error, msg),
        }
    }
}

impl From<ScenarioError> for Outcome {
    fn from(err: ScenarioError) -> Self {
        Self::Error(err.to_string())
    }
}

type Step = Result<(), Outcome>;

/// Live state of one role during a run
#[derive(Debug)]
struct RoleRuntime {
    account: Option<AccountId>,
    registration: Option<RegistrationState>,
    call: Option<CallId>,
    call_state: Option<CallState>,
    hung_up: bool,
    dtmf: DtmfBuffer,
}

impl RoleRuntime {
    fn new(max_dtmf_digits: usize) -> Self {
        Self {
            account: None,
            registration: None,
            call: None,
            call_state: None,
            hung_up: false,
            dtmf: DtmfBuffer::new(max_dtmf_digits),
        }
    }

    fn call_is_open(&self) -> bool {
        self.call.is_some() && !self.hung_up && !self.call_state.is_some_and(|s| s.is_terminated())
    }
}

/// Runs a single test definition
pub struct TestEngine<S> {
    config: EngineConfig,
    definition: TestDefinition,
    session: S,
    sink: Option<EventSink>,
    events: EventQueue,
    shutdown: CancellationToken,
    phase: Phase,
    deadline: Option<Instant>,
    caller: RoleRuntime,
    receiver: RoleRuntime,
    ever_connected: bool,
    initialized: bool,
    cleaning_up: bool,
    attached: bool,
    registered: Vec<AccountId>,
    result: TestResult,
}

impl<S: SipSession> TestEngine<S> {
    pub fn new(config: EngineConfig, definition: TestDefinition, session: S) -> Self {
        let (sink, events) = event_channel();
        let result = TestResult::new(definition.name.clone());
        let max_dtmf = config.max_dtmf_digits;

        Self {
            config,
            definition,
            session,
            sink: Some(sink),
            events,
            shutdown: CancellationToken::new(),
            phase: Phase::Idle,
            deadline: None,
            caller: RoleRuntime::new(max_dtmf),
            receiver: RoleRuntime::new(max_dtmf),
            ever_connected: false,
            initialized: false,
            cleaning_up: false,
            attached: false,
            registered: Vec::new(),
            result,
        }
    }

    /// Stop waiting as soon as `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run the test to completion
    pub async fn run(mut self) -> TestResult {
        let span = info_span!("test", name = %self.definition.name);

        async move {
            let started = Instant::now();
            self.result.set_status(TestStatus::Running);
            if self.definition.timeout_secs > 0 {
                self.deadline =
                    started.checked_add(Duration::from_secs(self.definition.timeout_secs));
            }
            info!("Starting test: {}", self.definition.name);

            let outcome = self.execute().await;

            self.result.duration_secs = started.elapsed().as_secs_f64();
            self.result.connected = self.ever_connected;
            self.result.dtmf_received = self.receiver.dtmf.as_str().to_string();
            for role in ROLES {
                let dtmf = &self.runtime(role).dtmf;
                if dtmf.dropped() > 0 {
                    warn!("{} dropped {} DTMF digits past {}", role, dtmf.dropped(), dtmf.len());
                }
            }

            self.cleanup().await;
            self.finish(outcome)
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self) -> Step {
        self.initialize().await?;
        self.connect().await?;
        self.run_actions().await?;
        self.evaluate().await
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn runtime(&self, role: Role) -> &RoleRuntime {
        match role {
            Role::Caller => &self.caller,
            Role::Receiver => &self.receiver,
        }
    }

    fn runtime_mut(&mut self, role: Role) -> &mut RoleRuntime {
        match role {
            Role::Caller => &mut self.caller,
            Role::Receiver => &mut self.receiver,
        }
    }

    async fn initialize(&mut self) -> Step {
        self.enter(Phase::Initializing);

        for role in ROLES {
            let count = self.definition.role(role).actions.len();
            if count > self.config.max_actions_per_role {
                return Err(ScenarioError::CapacityExceeded {
                    role: role.to_string(),
                    count,
                    limit: self.config.max_actions_per_role,
                }
                .into());
            }
        }

        let accounts = match (
            self.config.find_account(&self.definition.caller.account),
            self.config.find_account(&self.definition.receiver.account),
        ) {
            (Some(caller), Some(receiver)) => [caller.clone(), receiver.clone()],
            _ => {
                return Err(Outcome::Error(format!(
                    "Account not found: caller={} receiver={}",
                    self.definition.caller.account, self.definition.receiver.account
                )))
            }
        };

        self.session.initialize().await.map_err(|e| {
            error!("SIP session initialization failed: {}", e);
            Outcome::from(ScenarioError::from(e))
        })?;
        self.initialized = true;

        if let Some(sink) = self.sink.take() {
            self.session.attach_events(sink);
            self.attached = true;
        }

        for (role, account) in ROLES.into_iter().zip(accounts.iter()) {
            self.register(role, account).await?;
        }

        let timeout = Duration::from_secs(self.config.registration_timeout_secs);
        for (role, account) in ROLES.into_iter().zip(accounts.iter()) {
            self.wait_for(timeout, |engine| {
                engine
                    .runtime(role)
                    .registration
                    .as_ref()
                    .is_some_and(RegistrationState::is_settled)
            })
            .await?;

            match &self.runtime(role).registration {
                Some(RegistrationState::Registered) => {
                    info!("{} account '{}' registered", role, account.id);
                }
                Some(state @ RegistrationState::Failed { .. }) => {
                    error!("{} account '{}' registration {}", role, account.id, state);
                    return Err(Outcome::Error(format!(
                        "Registration of {} account '{}' {}",
                        role, account.id, state
                    )));
                }
                _ => {
                    error!("{} account '{}' did not register", role, account.id);
                    return Err(Outcome::Error(format!(
                        "Registration of {} account '{}' timed out after {}s",
                        role, account.id, self.config.registration_timeout_secs
                    )));
                }
            }
        }

        Ok(())
    }

    async fn register(&mut self, role: Role, account: &AccountConfig) -> Step {
        info!("Registering {} account '{}' ({})", role, account.id, account.uri());
        let id = self.session.register(account).await.map_err(|e| {
            error!("Failed to register {} account '{}': {}", role, account.id, e);
            Outcome::Error(format!("Failed to register {} account '{}': {}", role, account.id, e))
        })?;

        self.registered.push(id);
        let runtime = self.runtime_mut(role);
        runtime.account = Some(id);
        runtime.registration = Some(RegistrationState::Registering);
        Ok(())
    }

    async fn connect(&mut self) -> Step {
        self.enter(Phase::Connecting);

        let uri = self.definition.caller.uri.clone();
        if uri.is_empty() {
            return Err(Outcome::Failed(
                "Expected the call to connect, but the caller has no destination URI".to_string(),
            ));
        }
        let Some(account) = self.caller.account else {
            return Err(Outcome::Error("Caller account is not registered".to_string()));
        };

        info!("Calling {}", uri);
        let call = self
            .session
            .make_call(account, &uri)
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to place call to {}: {}", uri, e)))?;
        self.caller.call = Some(call);
        self.caller.call_state = Some(CallState::Calling);

        let timeout_secs = self.definition.caller.timeout_secs;
        self.wait_for(Duration::from_secs(timeout_secs), |engine| {
            engine
                .caller
                .call_state
                .is_some_and(|s| s.is_connected() || s.is_terminated())
        })
        .await?;

        match self.caller.call_state {
            Some(CallState::Connected) => {
                info!("Call {} connected", call);
                Ok(())
            }
            Some(CallState::Disconnected { code }) => Err(Outcome::Failed(format!(
                "Expected the call to connect, but it ended with {} before connecting",
                code
            ))),
            _ => Err(Outcome::Failed(format!(
                "Expected the call to connect, but it was not connected within {}s",
                timeout_secs
            ))),
        }
    }

    async fn run_actions(&mut self) -> Step {
        self.enter(Phase::Active);

        for role in [Role::Receiver, Role::Caller] {
            let actions = self.definition.role(role).actions.clone();
            for (index, action) in actions.iter().enumerate() {
                self.check_limits()?;
                info!("[{}] action {}/{}: {}", role, index + 1, actions.len(), action);
                self.execute_action(role, action).await?;
            }
        }

        self.settle().await
    }

    async fn execute_action(&mut self, role: Role, action: &Action) -> Step {
        if action.kind().is_deferred() {
            debug!("[{}] {} is checked during evaluation", role, action.kind());
            return Ok(());
        }

        if let Action::Wait { seconds } = action {
            return match Duration::try_from_secs_f64(*seconds) {
                Ok(duration) => self.wait_for(duration, |_| false).await.map(|_| ()),
                Err(_) => {
                    warn!("[{}] ignoring wait of {} seconds", role, seconds);
                    Ok(())
                }
            };
        }

        let Some(call) = self.runtime(role).call else {
            return Err(Outcome::Failed(format!(
                "Action '{}' failed: {} has no call",
                action, role
            )));
        };

        let outcome = match action {
            Action::SendDtmf { digits, .. } => {
                let invalid = invalid_digits(digits);
                if !invalid.is_empty() {
                    warn!("[{}] '{}' contains non-DTMF characters {:?}", role, digits, invalid);
                }
                self.session.send_tone(call, digits).await
            }
            Action::PlayAudio { file, looped } => self.session.play_file(call, file, *looped).await,
            Action::RecordAudio { file } => self.session.start_recording(call, file).await,
            Action::Hangup { code } => {
                let outcome = self.session.hangup(call, *code).await;
                if outcome.is_ok() {
                    self.runtime_mut(role).hung_up = true;
                }
                outcome
            }
            Action::Wait { .. } | Action::ExpectDtmf { .. } | Action::ExpectBeeps { .. } => Ok(()),
        };

        outcome.map_err(|e| {
            warn!("[{}] action '{}' failed: {}", role, action, e);
            Outcome::Failed(format!("Action '{}' failed: {}", action, e))
        })
    }

    async fn settle(&mut self) -> Step {
        let settle = Duration::from_millis(self.config.settle_ms);
        self.wait_for(settle, |_| false).await.map(|_| ())
    }

    async fn evaluate(&mut self) -> Step {
        self.enter(Phase::Evaluating);

        if self.definition.expect.connected && !self.ever_connected {
            return Err(Outcome::Failed(
                "Expected the call to connect, but it never did".to_string(),
            ));
        }

        if self.definition.needs_beep_analysis() {
            self.check_beeps()?;
        }

        self.check_dtmf().await
    }

    fn check_beeps(&mut self) -> Step {
        let Some(path) = self.definition.receiver.recording_path().map(Path::to_path_buf) else {
            return Err(Outcome::Failed(
                "Beeps are expected but the receiver never records".to_string(),
            ));
        };

        info!("Analyzing recording {} for beeps", path.display());
        let analysis = analyze_file(&path, &self.config.analyzer).map_err(|e| {
            error!("Failed to analyze recording {}: {}", path.display(), e);
            ScenarioError::from(e)
        })?;
        let end = analysis.end_time_secs();

        let expect = self.definition.expect;
        let mut beep = self.config.beep;
        if expect.beep_frequency > 0.0 {
            beep = beep.with_target_freq(expect.beep_frequency as f32);
        }

        let summary = segment_frames(&analysis.frames, end, beep);
        self.result.beeps_detected = summary.count();
        self.result.beep_frequency = summary.first_frequency_hz().unwrap_or(0.0);
        info!(
            "Detected {} beeps in {} frames (first at {:?}s)",
            summary.count(),
            analysis.frames.len(),
            summary.first_beep_time_secs
        );

        if expect.beep_count > 0 && summary.count() != expect.beep_count as usize {
            return Err(Outcome::Failed(format!(
                "Expected {} beeps, detected {}",
                expect.beep_count,
                summary.count()
            )));
        }

        let per_action: Vec<(u32, f64)> = self
            .definition
            .receiver
            .beep_expectations()
            .chain(self.definition.caller.beep_expectations())
            .collect();

        for (count, frequency) in per_action {
            let detected =
                segment_frames(&analysis.frames, end, self.config.beep.with_target_freq(frequency as f32))
                    .count();
            if detected != count as usize {
                let at = if frequency > 0.0 {
                    format!(" at {:.0} Hz", frequency)
                } else {
                    String::new()
                };
                return Err(Outcome::Failed(format!(
                    "expect_beeps: expected {} beeps{}, detected {}",
                    count, at, detected
                )));
            }
        }

        Ok(())
    }

    async fn check_dtmf(&mut self) -> Step {
        for role in [Role::Receiver, Role::Caller] {
            let expectations: Vec<(String, u64)> = self
                .definition
                .role(role)
                .actions
                .iter()
                .filter_map(|action| match action {
                    Action::ExpectDtmf { pattern, timeout_secs } => {
                        Some((pattern.clone(), *timeout_secs))
                    }
                    _ => None,
                })
                .collect();

            for (pattern, timeout_secs) in expectations {
                // Late digits can only help while what arrived is still a prefix of the pattern
                let waited = self
                    .wait_for(Duration::from_secs(timeout_secs), |engine| {
                        let runtime = engine.runtime(role);
                        runtime.dtmf.matches(&pattern)
                            || !pattern.starts_with(runtime.dtmf.as_str())
                            || !runtime.call_is_open()
                    })
                    .await;
                // Running into the overall deadline only ends the wait; the digits decide
                match waited {
                    Ok(_) | Err(Outcome::Timeout(_)) => {}
                    Err(outcome) => return Err(outcome),
                }

                let received = self.runtime(role).dtmf.as_str();
                if !self.runtime(role).dtmf.matches(&pattern) {
                    return Err(Outcome::Failed(format!(
                        "Expected DTMF '{}' on {}, received '{}'",
                        pattern, role, received
                    )));
                }
                info!("{} received expected DTMF '{}'", role, pattern);
            }
        }

        Ok(())
    }

    fn check_limits(&self) -> Step {
        if self.shutdown.is_cancelled() {
            return Err(Outcome::cancelled());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Outcome::Timeout(format!(
                    "Test exceeded its {}s timeout",
                    self.definition.timeout_secs
                )));
            }
        }
        Ok(())
    }

    /// Pump events until `done` holds or `timeout` elapses.
    ///
    /// Returns whether `done` was satisfied. The overall deadline and
    /// cancellation end the wait with an outcome instead.
    async fn wait_for<F>(&mut self, timeout: Duration, done: F) -> Result<bool, Outcome>
    where
        F: Fn(&Self) -> bool,
    {
        let until = Instant::now().checked_add(timeout);

        loop {
            if done(&*self) {
                return Ok(true);
            }
            self.check_limits()?;

            let now = Instant::now();
            let mut slice = POLL_SLICE;
            if let Some(until) = until {
                if now >= until {
                    return Ok(false);
                }
                slice = slice.min(until - now);
            }
            if let Some(deadline) = self.deadline {
                slice = slice.min(deadline.saturating_duration_since(now));
            }

            self.pump(slice).await?;
        }
    }

    /// One poll slice followed by applying every queued event
    async fn pump(&mut self, max_wait: Duration) -> Step {
        let polled = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Outcome::cancelled()),
            polled = self.session.poll(max_wait) => polled,
        };
        polled.map_err(|e| {
            error!("SIP poll failed: {}", e);
            ScenarioError::from(e)
        })?;

        for event in self.events.drain() {
            self.apply(event).await;
        }
        Ok(())
    }

    /// Poll and apply events for `duration`, ignoring the deadline and cancellation
    async fn drain_for(&mut self, duration: Duration) {
        let Some(until) = Instant::now().checked_add(duration) else {
            return;
        };
        loop {
            let now = Instant::now();
            if now >= until {
                break;
            }
            if let Err(e) = self.session.poll(POLL_SLICE.min(until - now)).await {
                warn!("SIP poll failed during cleanup: {}", e);
                break;
            }
            for event in self.events.drain() {
                self.apply(event).await;
            }
        }
    }

    async fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::RegistrationChanged { account, state } => {
                for role in ROLES {
                    let runtime = self.runtime_mut(role);
                    if runtime.account == Some(account) {
                        debug!("{} registration: {}", role, state);
                        runtime.registration = Some(state.clone());
                    }
                }
            }
            SessionEvent::IncomingCall {
                call,
                account,
                from,
                to,
            } => {
                if self.receiver.account != Some(account) || self.receiver.call.is_some() {
                    debug!("Ignoring incoming call {} from {}", call, from);
                    return;
                }
                info!("Incoming call {} from {} to {}", call, from, to);
                self.receiver.call = Some(call);
                self.receiver.call_state = Some(CallState::Incoming);

                if self.definition.receiver.auto_answer && !self.cleaning_up {
                    if let Err(e) = self.session.answer(call, ANSWER_CODE).await {
                        warn!("Failed to answer {}: {}", call, e);
                    }
                }
            }
            SessionEvent::CallStateChanged { call, state } => {
                for role in ROLES {
                    let runtime = self.runtime_mut(role);
                    if runtime.call == Some(call) {
                        info!("{} call {}: {}", role, call, state);
                        runtime.call_state = Some(state);
                        if state.is_connected() {
                            self.ever_connected = true;
                        }
                    }
                }
            }
            SessionEvent::ToneReceived {
                call,
                digit,
                duration_ms,
            } => {
                for role in ROLES {
                    let runtime = self.runtime_mut(role);
                    if runtime.call == Some(call) {
                        debug!("{} received DTMF '{}' ({}ms)", role, digit, duration_ms);
                        runtime.dtmf.push(digit);
                    }
                }
            }
        }
    }

    async fn cleanup(&mut self) {
        self.cleaning_up = true;

        for role in ROLES {
            let runtime = self.runtime(role);
            if !runtime.call_is_open() {
                continue;
            }
            let Some(call) = runtime.call else {
                continue;
            };

            debug!("Hanging up {} call {}", role, call);
            if let Err(e) = self.session.hangup(call, DEFAULT_HANGUP_CODE).await {
                warn!("Failed to hang up {}: {}", call, e);
            }
            self.runtime_mut(role).hung_up = true;

            // The other leg usually ends with this one
            self.drain_for(Duration::from_millis(self.config.settle_ms)).await;
        }

        if self.attached {
            self.session.detach_events();
            self.attached = false;
        }

        while let Some(account) = self.registered.pop() {
            if let Err(e) = self.session.unregister(account).await {
                warn!("Failed to unregister {}: {}", account, e);
            }
        }

        if self.initialized {
            if let Err(e) = self.session.shutdown().await {
                warn!("SIP session shutdown failed: {}", e);
            }
            self.initialized = false;
        }

        self.enter(Phase::Finished);
    }

    fn finish(mut self, outcome: Step) -> TestResult {
        match outcome {
            Ok(()) => {
                self.result.conclude(TestStatus::Passed, None);
                info!(
                    "Test PASSED: {} ({:.1}s)",
                    self.definition.name, self.result.duration_secs
                );
            }
            Err(outcome) => {
                let (status, message) = outcome.into_parts();
                warn!(
                    "Test {}: {} - {} ({:.1}s)",
                    status.as_str().to_uppercase(),
                    self.definition.name,
                    message,
                    self.result.duration_secs
                );
                self.result.conclude(status, Some(message));
            }
        }
        self.result
    }
}
