//! # sipcheck scenario core
//!
//! Scripted two-party call verification. A JSON test definition describes a
//! caller and a receiver, the actions each performs once the call is up, and
//! what the run is expected to observe. [`TestEngine`] drives any
//! [`SipSession`] implementation through the scenario and folds the call
//! state, received DTMF and beeps found in the receiver's recording into a
//! [`TestResult`].
//!
//! ```rust,no_run
//! use sipcheck_scenario_core::{parse_test_file, EngineConfig, SipSession, TestEngine};
//!
//! # async fn example<S: SipSession>(session: S) -> Result<(), sipcheck_scenario_core::ScenarioError> {
//! let config = EngineConfig::load("sipcheck.toml")?;
//! let definition = parse_test_file("tests/beep_on_answer.json")?;
//! let result = TestEngine::new(config, definition, session).run().await;
//! std::process::exit(result.exit_code());
//! # }
//! ```

pub mod config;
pub mod dtmf;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod session;

pub use config::{AccountConfig, EngineConfig, Transport};
pub use dtmf::{matches_prefix, DtmfBuffer, DtmfDigit};
pub use engine::{TestEngine, POLL_SLICE};
pub use error::{ScenarioError, ScenarioResult, SessionError, SessionResult};
pub use model::{
    Action, ActionKind, Expectations, Role, RoleConfig, TestDefinition, TestResult, TestStatus,
};
pub use parser::{parse_test_file, parse_test_str, TestParser, MAX_TEST_FILE_BYTES};
pub use session::{
    event_channel, AccountId, CallId, CallState, EventQueue, EventSink, RegistrationState,
    SessionEvent, SipSession,
};
