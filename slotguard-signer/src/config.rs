//! Coordinator configuration.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slotguard_lock::{Credentials, KeyError, Namespace};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

/// Errors loading or validating a [`CoordinatorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Namespace(#[from] KeyError),
}

/// Settings shared by every signer instance of one validator.
///
/// `namespace` must be identical across all instances, otherwise they claim
/// different keys and do not exclude each other.
#[derive(Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Owner identity written into every lock record
    pub validator_name: String,
    /// Key prefix, e.g. `val_lock/<validator-address>`
    pub namespace: String,
    /// Coordination store endpoints
    pub endpoints: Vec<String>,
    /// Bound on connecting and on every claim, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl CoordinatorConfig {
    pub fn new(
        validator_name: impl Into<String>,
        namespace: impl Into<String>,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            validator_name: validator_name.into(),
            namespace: namespace.into(),
            endpoints,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            username: None,
            password: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Loads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading coordinator config from {:?}", path);
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        })
    }

    /// Checks every field and returns the parsed key namespace.
    pub fn validate(&self) -> Result<Namespace, ConfigError> {
        if self.validator_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "validator_name",
                reason: "must not be empty",
            });
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoints",
                reason: "at least one endpoint is required",
            });
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "endpoints",
                reason: "endpoint must not be empty",
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::Invalid {
                field: "password",
                reason: "set without username",
            });
        }

        Ok(Namespace::new(self.namespace.clone())?)
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("validator_name", &self.validator_name)
            .field("namespace", &self.namespace)
            .field("endpoints", &self.endpoints)
            .field("timeout_ms", &self.timeout_ms)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig::new(
            "validator-a",
            "val_lock/validator",
            vec!["http://127.0.0.1:2379".to_string()],
        )
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "validator_name": "validator-a",
                "namespace": "val_lock/validator",
                "endpoints": ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
            }}"#
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.validator_name, "validator-a");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"validator_name": "v", "namespace": "ns", "endpoints": [], "timeout_ms": 5}}"#
        )
        .unwrap();

        let err = CoordinatorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "endpoints", .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CoordinatorConfig::from_file("/nonexistent/slotguard.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut c = config();
        c.timeout_ms = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "timeout_ms", .. })));

        let mut c = config();
        c.validator_name = " ".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "validator_name", .. })));

        let mut c = config();
        c.namespace = "a//b".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::Namespace(_))));

        let mut c = config();
        c.password = Some("secret".to_string());
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "password", .. })));
    }

    #[test]
    fn test_password_is_not_printed_or_serialized() {
        let mut c = config();
        c.username = Some("root".to_string());
        c.password = Some("hunter2".to_string());

        assert!(!format!("{c:?}").contains("hunter2"));
        assert!(!serde_json::to_string(&c).unwrap().contains("hunter2"));

        let credentials = c.credentials().unwrap();
        assert_eq!(credentials.username, "root");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn test_with_timeout() {
        let c = config().with_timeout(Duration::from_millis(250));
        assert_eq!(c.timeout_ms, 250);
        assert_eq!(c.validate().unwrap().as_str(), "val_lock/validator");
    }
}
