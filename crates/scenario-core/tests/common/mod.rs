//! Shared helpers for orchestrator tests: an in-memory SIP user agent that
//! connects the caller's call straight to the receiver, plus WAV fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use sipcheck_scenario_core::{
    AccountConfig, AccountId, CallId, CallState, EngineConfig, EventSink, RegistrationState,
    SessionError, SessionEvent, SessionResult, SipSession,
};
use tokio::time::Instant;

/// What the scripted user agent does
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_initialize: bool,
    /// Reject every REGISTER with this status
    pub reject_registration: Option<(u16, String)>,
    /// Whether outgoing calls reach the receiver
    pub deliver_calls: bool,
    /// Samples written when a recording starts
    pub recording: Option<Vec<i16>>,
    /// Network latency applied to every event
    pub event_delay: Duration,
    /// The far end hangs up this long after the call is answered
    pub remote_hangup_after: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_initialize: false,
            reject_registration: None,
            deliver_calls: true,
            recording: None,
            event_delay: Duration::from_millis(20),
            remote_hangup_after: None,
        }
    }
}

/// Commands issued to the scripted session, in order, and every poll length
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    commands: Arc<Mutex<Vec<String>>>,
    polls: Arc<Mutex<Vec<Duration>>>,
}

impl CommandLog {
    fn push(&self, entry: String) {
        self.commands.lock().unwrap().push(entry);
    }

    fn record_poll(&self, max_wait: Duration) {
        self.polls.lock().unwrap().push(max_wait);
    }

    pub fn entries(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn polls(&self) -> Vec<Duration> {
        self.polls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

/// Loopback user agent: the caller's call rings the other registered account
pub struct ScriptedSession {
    script: Script,
    log: CommandLog,
    sink: Option<EventSink>,
    pending: Vec<(Instant, SessionEvent)>,
    next_id: u32,
    accounts: Vec<AccountId>,
    peers: HashMap<CallId, CallId>,
}

impl ScriptedSession {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: CommandLog::default(),
            sink: None,
            pending: Vec::new(),
            next_id: 1,
            accounts: Vec::new(),
            peers: HashMap::new(),
        }
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn schedule(&mut self, event: SessionEvent) {
        self.schedule_after(Duration::ZERO, event);
    }

    fn schedule_after(&mut self, after: Duration, event: SessionEvent) {
        self.pending
            .push((Instant::now() + self.script.event_delay + after, event));
    }

    fn deliver_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|(at, _)| *at <= now);
        self.pending = later;
        if let Some(sink) = &self.sink {
            for (_, event) in due {
                sink.post(event);
            }
        }
    }
}

#[async_trait]
impl SipSession for ScriptedSession {
    async fn initialize(&mut self) -> SessionResult<()> {
        self.log.push("initialize".into());
        if self.script.fail_initialize {
            return Err(SessionError::initialization("no transport available"));
        }
        Ok(())
    }

    fn attach_events(&mut self, sink: EventSink) {
        self.log.push("attach".into());
        self.sink = Some(sink);
    }

    fn detach_events(&mut self) {
        self.log.push("detach".into());
        self.sink = None;
    }

    async fn register(&mut self, account: &AccountConfig) -> SessionResult<AccountId> {
        self.log.push(format!("register {}", account.id));
        let id = AccountId(self.next_id());
        self.accounts.push(id);

        let state = match &self.script.reject_registration {
            Some((code, reason)) => RegistrationState::Failed {
                code: *code,
                reason: reason.clone(),
            },
            None => RegistrationState::Registered,
        };
        self.schedule(SessionEvent::RegistrationChanged { account: id, state });
        Ok(id)
    }

    async fn unregister(&mut self, account: AccountId) -> SessionResult<()> {
        self.log.push(format!("unregister {}", account));
        Ok(())
    }

    async fn make_call(&mut self, account: AccountId, uri: &str) -> SessionResult<CallId> {
        self.log.push(format!("make_call {}", uri));
        let call = CallId(self.next_id());
        self.schedule(SessionEvent::CallStateChanged {
            call,
            state: CallState::Calling,
        });

        let callee = self.accounts.iter().copied().find(|a| *a != account);
        if let (true, Some(callee)) = (self.script.deliver_calls, callee) {
            let incoming = CallId(self.next_id());
            self.peers.insert(call, incoming);
            self.peers.insert(incoming, call);
            self.schedule(SessionEvent::IncomingCall {
                call: incoming,
                account: callee,
                from: "sip:caller@test.local".into(),
                to: uri.into(),
            });
        }
        Ok(call)
    }

    async fn answer(&mut self, call: CallId, code: u16) -> SessionResult<()> {
        self.log.push(format!("answer {} {}", call, code));
        let peer = self
            .peers
            .get(&call)
            .copied()
            .ok_or_else(|| SessionError::call(format!("unknown call {}", call)))?;
        for call in [call, peer] {
            self.schedule(SessionEvent::CallStateChanged {
                call,
                state: CallState::Connected,
            });
        }
        if let Some(after) = self.script.remote_hangup_after {
            for call in [call, peer] {
                self.schedule_after(
                    after,
                    SessionEvent::CallStateChanged {
                        call,
                        state: CallState::Disconnected { code: 200 },
                    },
                );
            }
        }
        Ok(())
    }

    async fn hangup(&mut self, call: CallId, code: u16) -> SessionResult<()> {
        self.log.push(format!("hangup {} {}", call, code));
        let peer = self.peers.get(&call).copied();
        for call in std::iter::once(call).chain(peer) {
            self.schedule(SessionEvent::CallStateChanged {
                call,
                state: CallState::Disconnected { code },
            });
        }
        Ok(())
    }

    async fn send_tone(&mut self, call: CallId, digits: &str) -> SessionResult<()> {
        self.log.push(format!("send_tone {} {}", call, digits));
        if let Some(peer) = self.peers.get(&call).copied() {
            for digit in digits.chars() {
                self.schedule(SessionEvent::ToneReceived {
                    call: peer,
                    digit,
                    duration_ms: 160,
                });
            }
        }
        Ok(())
    }

    async fn play_file(&mut self, call: CallId, file: &Path, looped: bool) -> SessionResult<()> {
        self.log
            .push(format!("play_file {} {} {}", call, file.display(), looped));
        Ok(())
    }

    async fn start_recording(&mut self, call: CallId, file: &Path) -> SessionResult<()> {
        self.log.push(format!("start_recording {} {}", call, file.display()));
        if let Some(samples) = &self.script.recording {
            write_wav(file, 8000, samples).map_err(|e| SessionError::media(e.to_string()))?;
        }
        Ok(())
    }

    async fn poll(&mut self, max_wait: Duration) -> SessionResult<()> {
        self.log.record_poll(max_wait);
        tokio::time::sleep(max_wait).await;
        self.deliver_due();
        Ok(())
    }

    async fn shutdown(&mut self) -> SessionResult<()> {
        self.log.push("shutdown".into());
        Ok(())
    }
}

/// Engine configuration with accounts `alice` and `bob`
pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .with_account(AccountConfig::new("alice", "1001", "secret", "pbx.test.local"))
        .with_account(AccountConfig::new("bob", "1002", "secret", "pbx.test.local"))
}

/// Sine at 0.5 full scale
pub fn tone(freq: f32, sample_rate: u32, secs: f32) -> Vec<i16> {
    let n = (sample_rate as f32 * secs) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * PI * freq * t).sin() * 0.5 * 32767.0) as i16
        })
        .collect()
}

pub fn silence(sample_rate: u32, secs: f32) -> Vec<i16> {
    vec![0; (sample_rate as f32 * secs) as usize]
}

/// `count` beeps of 200ms separated by 300ms of silence, 8 kHz
pub fn beep_train(count: usize, freq: f32) -> Vec<i16> {
    let mut samples = silence(8000, 0.2);
    for _ in 0..count {
        samples.extend(tone(freq, 8000, 0.2));
        samples.extend(silence(8000, 0.3));
    }
    samples
}

pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()
}
