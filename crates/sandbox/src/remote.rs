//! Remote kernel execution backend.
//!
//! The same contract as the local backends, backed by a managed kernel
//! service: one sandbox instance maps to one remote session, created on
//! `connect` and destroyed on `shutdown`. The remote side owns namespace
//! persistence between calls; this client only serializes access and
//! classifies failures. Transport failures are reported distinctly from
//! code failures so the agent knows whether to fix its code or its
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tokio::sync::Mutex;

use codexec_core::config::RemoteSettings;
use codexec_core::{Error, Result};

use crate::context;
use crate::contract::{
    ContextSnapshot, ContextUpdate, ExecutionResult, Sandbox, SandboxOptions, VarMap,
};
use crate::protocol::WorkerResponse;
use crate::taxonomy::{Classified, ErrorKind};

/// Connection settings for the managed kernel service.
#[derive(Debug, Clone)]
pub struct RemoteKernelConfig {
    /// Service root, e.g. `https://kernels.example.com`.
    pub base_url: String,
    /// Bearer credential, obtained from the caller's credential store.
    pub api_key: Secret<String>,
    /// Per-request transport budget, on top of the execution budget.
    pub request_timeout: Duration,
}

impl RemoteKernelConfig {
    /// Build from the loaded configuration section.
    pub fn from_settings(settings: &RemoteSettings) -> Result<Self> {
        let base_url = settings.base_url.clone().ok_or_else(|| {
            Error::remote_kernel(
                "remote.base_url is not configured; set it to the kernel service URL",
            )
        })?;
        let api_key = settings.api_key.clone().ok_or_else(|| {
            Error::remote_kernel(
                "remote.api_key is not configured; provide a kernel service credential",
            )
        })?;
        Ok(Self {
            base_url,
            api_key,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionContextResponse {
    #[serde(default)]
    variables: VarMap,
}

/// Sandbox backend executing on a managed remote kernel.
#[derive(Debug)]
pub struct RemoteSandbox {
    session_id: String,
    options: SandboxOptions,
    config: RemoteKernelConfig,
    http: reqwest::Client,
    // Serializes calls so only one round-trip is outstanding per instance.
    lock: Mutex<()>,
}

impl RemoteSandbox {
    /// Provision a remote session and bind this instance to it.
    pub async fn connect(config: RemoteKernelConfig, options: SandboxOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::remote_kernel(format!("failed to build HTTP client: {err}")))?;

        let url = format!("{}/v1/sessions", config.base_url.trim_end_matches('/'));
        let response = http
            .post(&url)
            .bearer_auth(config.api_key.expose_secret())
            .send()
            .await
            .map_err(|err| Error::remote_kernel(session_failure_diagnostics(&err)))?;
        let response = response
            .error_for_status()
            .map_err(|err| Error::remote_kernel(format!("session creation rejected: {err}")))?;
        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|err| Error::remote_kernel(format!("malformed session response: {err}")))?;

        tracing::info!(session_id = %created.session_id, "remote kernel session created");
        Ok(Self {
            session_id: created.session_id,
            options,
            config,
            http,
            lock: Mutex::new(()),
        })
    }

    /// The remote session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/sessions/{}{suffix}",
            self.config.base_url.trim_end_matches('/'),
            self.session_id
        )
    }

    fn transport_failure(&self, err: &reqwest::Error) -> ExecutionResult {
        if err.is_timeout() {
            return ExecutionResult::bare_failure(
                ErrorKind::Timeout,
                format!(
                    "remote execution did not answer within {:?}; stopped waiting \
                     (remote-side cancellation is best-effort)",
                    self.config.request_timeout
                ),
            );
        }
        ExecutionResult::failure(
            Classified::new(ErrorKind::RemoteExecution, session_failure_diagnostics(err)),
            String::new(),
            String::new(),
        )
    }
}

/// Actionable diagnostics instead of a raw transport trace.
fn session_failure_diagnostics(err: &reqwest::Error) -> String {
    let cause = if err.is_connect() {
        "could not connect to the kernel service; check the service URL, \
         network connectivity, and service status"
    } else if err.is_timeout() {
        "the kernel service did not answer in time; check service status and retry"
    } else if err.status().is_some_and(|s| s.as_u16() == 401 || s.as_u16() == 403) {
        "the kernel service rejected the credential; check that the API key \
         is valid and unexpired"
    } else {
        "the kernel service call failed; check credentials, connectivity, \
         and service status"
    };
    format!("{cause} ({err})")
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    async fn run(&self, code: &str) -> ExecutionResult {
        let _guard = self.lock.lock().await;

        let body = serde_json::json!({
            "code": code,
            "timeout_ms": self.options.timeout.as_millis() as u64,
        });

        let response = match self
            .http
            .post(self.url("/execute"))
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.options.timeout + self.config.request_timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return self.transport_failure(&err),
        };

        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(err) => return self.transport_failure(&err),
        };

        match response.json::<WorkerResponse>().await {
            Ok(wire) => wire.into_result(),
            Err(err) => ExecutionResult::bare_failure(
                ErrorKind::Deserialization,
                format!("remote kernel reply was not a valid response message: {err}"),
            ),
        }
    }

    async fn get_context(&self) -> ContextSnapshot {
        let _guard = self.lock.lock().await;

        let fetched = async {
            let response = self
                .http
                .get(self.url("/context"))
                .bearer_auth(self.config.api_key.expose_secret())
                .send()
                .await?
                .error_for_status()?;
            response.json::<SessionContextResponse>().await
        }
        .await;

        match fetched {
            Ok(remote) => context::encode(remote.variables),
            Err(err) => {
                // get_context never raises; an unreachable kernel yields the
                // empty snapshot.
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "remote context fetch failed; returning empty snapshot"
                );
                context::encode(VarMap::new())
            }
        }
    }

    async fn update_context(&self, update: ContextUpdate) -> Result<()> {
        let variables = match update {
            ContextUpdate::Blob(blob) => context::decode(&blob)?,
            ContextUpdate::Values(values) => values,
        };

        let _guard = self.lock.lock().await;
        let body = serde_json::json!({ "variables": variables });
        let response = self
            .http
            .post(self.url("/context"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::remote_kernel(session_failure_diagnostics(&err)))?;
        response
            .error_for_status()
            .map_err(|err| Error::remote_kernel(format!("context update rejected: {err}")))?;
        Ok(())
    }

    async fn reset(&self) {
        let _guard = self.lock.lock().await;
        let outcome = self
            .http
            .post(self.url("/reset"))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(err) = outcome {
            tracing::warn!(
                session_id = %self.session_id,
                error = %err,
                "remote reset failed; session state may be stale"
            );
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let response = self
            .http
            .delete(self.url(""))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|err| Error::remote_kernel(session_failure_diagnostics(&err)))?;
        response
            .error_for_status()
            .map_err(|err| Error::remote_kernel(format!("session teardown rejected: {err}")))?;
        tracing::info!(session_id = %self.session_id, "remote kernel session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_url_and_credential() {
        let settings = RemoteSettings {
            base_url: None,
            api_key: None,
            request_timeout_ms: 1_000,
        };
        assert!(RemoteKernelConfig::from_settings(&settings).is_err());

        let settings = RemoteSettings {
            base_url: Some("https://kernels.example.com".into()),
            api_key: Some(Secret::new("k-123".into())),
            request_timeout_ms: 1_000,
        };
        let config = RemoteKernelConfig::from_settings(&settings).unwrap();
        assert_eq!(config.base_url, "https://kernels.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn connect_to_unreachable_service_reports_diagnostics() {
        let config = RemoteKernelConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: Secret::new("k-123".into()),
            request_timeout: Duration::from_millis(500),
        };
        let err = RemoteSandbox::connect(config, SandboxOptions::default())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("check") || message.contains("service"),
            "diagnostics should be actionable, got: {message}"
        );
    }
}
