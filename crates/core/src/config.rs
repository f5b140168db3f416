use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub sandbox: SandboxSettings,
    pub remote: RemoteSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxSettings {
    /// Per-call execution budget in milliseconds.
    pub default_timeout_ms: u64,
    /// Extra wall-clock allowance for worker startup/teardown, in milliseconds.
    pub startup_grace_ms: u64,
    /// Explicit path to the worker binary. Resolved next to the current
    /// executable when unset.
    pub worker_path: Option<String>,
    /// Namespace entries never exported across a serialization boundary.
    pub exclude_names: Vec<String>,
    /// Name prefixes never exported (e.g. injected tool namespaces).
    pub exclude_prefixes: Vec<String>,
    /// Drop function pointers from exported context.
    pub exclude_callables: bool,
    /// Prefix that marks dynamically-loaded tool references in diagnostics.
    pub tool_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteSettings {
    pub base_url: Option<String>,
    pub api_key: Option<Secret<String>>,
    pub request_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CODEXEC_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map CODEXEC__SANDBOX__DEFAULT_TIMEOUT_MS=5000 to sandbox.default_timeout_ms
            .add_source(Environment::with_prefix("CODEXEC").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings {
                default_timeout_ms: 30_000,
                startup_grace_ms: 5_000,
                worker_path: None,
                exclude_names: vec![],
                exclude_prefixes: vec![],
                exclude_callables: false,
                tool_prefix: "tool_".into(),
            },
            remote: RemoteSettings {
                base_url: None,
                api_key: None,
                request_timeout_ms: 60_000,
            },
        }
    }
}
