//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address of the group member this agent acts for
    pub granter: String,

    /// Fee-paying keys; one transaction in flight per key
    pub signer_keys: Vec<String>,

    /// Directory for DKG secrets, group keys and DEs
    pub store_path: PathBuf,

    /// Hex-encoded 32-byte secret DEs are derived from
    pub random_secret: String,

    /// Maximum number of messages per transaction
    pub max_messages: usize,

    /// Submission attempts before giving up on a transaction
    pub max_try: u64,

    /// Pause between submission attempts (milliseconds)
    pub poll_interval_ms: u64,

    /// How long to wait for a broadcast transaction to commit (milliseconds)
    pub broadcast_timeout_ms: u64,

    /// How often the on-chain DE count is checked (milliseconds)
    pub check_de_interval_ms: u64,

    /// Gas adjustment of the first attempt
    pub gas_adjustment_start: f64,

    /// Increment applied after an out-of-gas failure
    pub gas_adjustment_step: f64,

    /// Upper bound for the gas adjustment
    pub max_gas_adjustment: f64,

    /// Deadline for setting up an event subscription (milliseconds)
    pub subscribe_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            granter: String::new(),
            signer_keys: Vec::new(),
            store_path: Self::default_store_path(),
            random_secret: String::new(),
            max_messages: 10,
            max_try: 5,
            poll_interval_ms: 500,
            broadcast_timeout_ms: 10_000,
            check_de_interval_ms: 300_000,
            gas_adjustment_start: 1.6,
            gas_adjustment_step: 0.2,
            max_gas_adjustment: 3.0,
            subscribe_timeout_ms: 5_000,
        }
    }
}

impl AgentConfig {
    /// Config for `granter` with a fresh random secret and one signer key
    pub fn for_granter(granter: impl Into<String>, store_path: PathBuf) -> Self {
        let granter = granter.into();
        let secret: [u8; 32] = rand::random();
        Self {
            signer_keys: vec![format!("{}-signer", granter)],
            granter,
            store_path,
            random_secret: hex::encode(secret),
            ..Self::default()
        }
    }

    fn default_store_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| {
                #[cfg(unix)]
                {
                    PathBuf::from("/var/lib")
                }
                #[cfg(windows)]
                {
                    PathBuf::from(r"C:\ProgramData")
                }
            })
            .join("tessera")
            .join("agent")
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.granter.is_empty() {
            return Err(AgentError::Config("granter must be set".to_string()));
        }
        if self.signer_keys.is_empty() {
            return Err(AgentError::Config("at least one signer key is required".to_string()));
        }
        if self.max_messages == 0 || self.max_try == 0 {
            return Err(AgentError::Config(
                "max_messages and max_try must be positive".to_string(),
            ));
        }
        if self.gas_adjustment_start <= 0.0 || self.max_gas_adjustment < self.gas_adjustment_start {
            return Err(AgentError::Config(format!(
                "invalid gas adjustment range {}..{}",
                self.gas_adjustment_start, self.max_gas_adjustment
            )));
        }
        self.random_secret_bytes()?;
        Ok(())
    }

    pub fn random_secret_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.random_secret)?;
        bytes
            .try_into()
            .map_err(|_| AgentError::Config("random_secret must be 32 bytes".to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn check_de_interval(&self) -> Duration {
        Duration::from_millis(self.check_de_interval_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Create the store directory if it doesn't exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_path)?;
        Ok(())
    }
}
