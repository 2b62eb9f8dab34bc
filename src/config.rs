//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::error::ConfigError;
use crate::provisioning::engine::DEFAULT_TOOL_TIMEOUT;

/// How humans are told about new requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMethod {
    /// Banner on stderr.
    Console,
    /// Event on the broadcast bus (WebSocket clients).
    Broadcast,
    None,
}

impl std::str::FromStr for NotificationMethod {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "broadcast" | "ws" => Ok(Self::Broadcast),
            "none" | "off" => Ok(Self::None),
            // Not wired up yet; see `AgentConfig::notification_fallback`
            "email" | "slack" => Ok(Self::Console),
            other => Err(ConfigError::InvalidValue {
                key: "ACCESS_AGENT_NOTIFY".to_string(),
                message: format!("unknown notification method '{}'", other),
            }),
        }
    }
}

/// Executor selection and limits.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Remote tool endpoint. `None` selects the simulated executor.
    pub tool_endpoint: Option<String>,
    /// Bearer token for the tool endpoint.
    pub tool_token: Option<SecretString>,
    /// Upper bound on a single tool call.
    pub tool_timeout: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            tool_endpoint: None,
            tool_token: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub notification: NotificationMethod,
    pub provisioning: ProvisioningConfig,
    /// Port for the REST/WebSocket API.
    pub api_port: u16,
    /// Seed sample requests on startup.
    pub demo: bool,
    /// Directory for daily rolling log files.
    pub log_dir: Option<PathBuf>,
    /// Requested notification method that fell back to the console.
    pub notification_fallback: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            notification: NotificationMethod::Console,
            provisioning: ProvisioningConfig::default(),
            api_port: 8080,
            demo: false,
            log_dir: None,
            notification_fallback: None,
        }
    }
}

impl AgentConfig {
    /// Read configuration from `ACCESS_AGENT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let requested = get("ACCESS_AGENT_NOTIFY");
        let notification = match &requested {
            Some(v) => v.parse()?,
            None => defaults.notification,
        };
        let notification_fallback = requested
            .map(|v| v.trim().to_lowercase())
            .filter(|v| matches!(v.as_str(), "email" | "slack"));

        let tool_timeout = match get("ACCESS_AGENT_TOOL_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = parse_value("ACCESS_AGENT_TOOL_TIMEOUT_SECS", &v)?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "ACCESS_AGENT_TOOL_TIMEOUT_SECS".to_string(),
                        message: "timeout must be at least one second".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => defaults.provisioning.tool_timeout,
        };

        let tool_token = get("ACCESS_AGENT_TOOL_TOKEN").map(SecretString::from);
        let tool_endpoint = get("ACCESS_AGENT_TOOL_ENDPOINT");
        if tool_token.is_some() && tool_endpoint.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "ACCESS_AGENT_TOOL_ENDPOINT".to_string(),
                hint: "A tool token was given without an endpoint to send it to.".to_string(),
            });
        }

        let api_port = match get("ACCESS_AGENT_API_PORT") {
            Some(v) => parse_value("ACCESS_AGENT_API_PORT", &v)?,
            None => defaults.api_port,
        };

        let demo = get("ACCESS_AGENT_DEMO")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.demo);

        Ok(Self {
            notification,
            provisioning: ProvisioningConfig {
                tool_endpoint,
                tool_token,
                tool_timeout,
            },
            api_port,
            demo,
            log_dir: get("ACCESS_AGENT_LOG_DIR").map(PathBuf::from),
            notification_fallback,
        })
    }

    /// Report settings that were accepted but replaced. Call once logging is up.
    pub fn warn_fallbacks(&self) {
        if let Some(method) = &self.notification_fallback {
            warn!(method = %method, "Notification method not implemented, using console");
        }
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", value, e),
        })
}
