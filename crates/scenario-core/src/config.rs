//! Engine configuration
//!
//! SIP accounts plus the tunables of the orchestrator and the recording
//! analysis. Everything has a default, so a TOML file only needs the parts
//! it changes:
//!
//! ```toml
//! registration_timeout_secs = 15
//!
//! [[accounts]]
//! id = "alice"
//! username = "1001"
//! password = "secret"
//! server = "pbx.local"
//!
//! [beep]
//! min_duration_secs = 0.1
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipcheck_analysis_core::{AnalyzerConfig, BeepConfig};
use tracing::debug;

use crate::error::{ScenarioError, ScenarioResult};

/// SIP transport of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Tcp => f.write_str("tcp"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

impl FromStr for Transport {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "tls" => Ok(Self::Tls),
            other => Err(ScenarioError::config(format!("unknown transport '{}'", other))),
        }
    }
}

/// One SIP account the roles of a test can refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Identifier used by `caller.account` / `receiver.account`
    pub id: String,
    pub username: String,
    pub password: String,
    /// Registrar host
    pub server: String,
    pub port: u16,
    /// Authentication realm, defaults to the server
    pub realm: Option<String>,
    pub display_name: Option<String>,
    pub transport: Transport,
    pub register_expires_secs: u32,
    /// Disabled accounts are never resolved
    pub enabled: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            username: String::new(),
            password: String::new(),
            server: String::new(),
            port: 5060,
            realm: None,
            display_name: None,
            transport: Transport::Udp,
            register_expires_secs: 3600,
            enabled: true,
        }
    }
}

impl AccountConfig {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            password: password.into(),
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Address-of-record, e.g. `sip:1001@pbx.local:5080;transport=tcp`
    pub fn uri(&self) -> String {
        let mut uri = format!("sip:{}@{}", self.username, self.server);
        if self.port != 5060 {
            uri.push_str(&format!(":{}", self.port));
        }
        if self.transport != Transport::Udp {
            uri.push_str(&format!(";transport={}", self.transport));
        }
        uri
    }

    /// Realm to authenticate against
    pub fn effective_realm(&self) -> &str {
        self.realm.as_deref().unwrap_or(&self.server)
    }
}

/// Configuration of a [`TestEngine`](crate::engine::TestEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub accounts: Vec<AccountConfig>,
    /// Beep detection used when verifying recordings
    pub beep: BeepConfig,
    /// Frame analysis used when verifying recordings
    pub analyzer: AnalyzerConfig,
    /// How long to wait for each account to register
    pub registration_timeout_secs: u64,
    /// Time given to in-flight events after the actions and after hangup
    pub settle_ms: u64,
    pub max_actions_per_role: usize,
    /// Remote digits kept per call
    pub max_dtmf_digits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            beep: BeepConfig::default(),
            analyzer: AnalyzerConfig::default(),
            registration_timeout_secs: 10,
            settle_ms: 500,
            max_actions_per_role: 32,
            max_dtmf_digits: 64,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: AccountConfig) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn with_beep(mut self, beep: BeepConfig) -> Self {
        self.beep = beep;
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_registration_timeout_secs(mut self, secs: u64) -> Self {
        self.registration_timeout_secs = secs;
        self
    }

    pub fn with_settle_ms(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }

    /// Enabled account with the given id
    pub fn find_account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.enabled && a.id == id)
    }

    /// Check the configuration for inconsistencies
    pub fn validate(&self) -> ScenarioResult<()> {
        for (i, account) in self.accounts.iter().enumerate() {
            if account.id.is_empty() {
                return Err(ScenarioError::config(format!("account #{} has no id", i)));
            }
            if account.server.is_empty() {
                return Err(ScenarioError::config(format!(
                    "account '{}' has no server",
                    account.id
                )));
            }
            if self.accounts[..i].iter().any(|a| a.id == account.id) {
                return Err(ScenarioError::config(format!(
                    "duplicate account id '{}'",
                    account.id
                )));
            }
        }

        let fft = self.analyzer.fft_size;
        if fft < 2 || !fft.is_power_of_two() {
            return Err(ScenarioError::config(format!(
                "analyzer.fft_size must be a power of two, got {}",
                fft
            )));
        }
        if self.analyzer.sample_rate == 0 {
            return Err(ScenarioError::config("analyzer.sample_rate must be positive"));
        }
        if self.beep.min_duration_secs > self.beep.max_duration_secs {
            return Err(ScenarioError::config(format!(
                "beep.min_duration_secs ({}) exceeds beep.max_duration_secs ({})",
                self.beep.min_duration_secs, self.beep.max_duration_secs
            )));
        }
        if self.max_actions_per_role == 0 {
            return Err(ScenarioError::config("max_actions_per_role must be positive"));
        }

        Ok(())
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> ScenarioResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ScenarioError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ScenarioError::io(path, e))?;
        let config = Self::from_toml_str(&text)?;
        debug!(
            "Loaded engine config from {} ({} accounts)",
            path.display(),
            config.accounts.len()
        );
        Ok(config)
    }
}
