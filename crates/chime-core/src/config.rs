use secrecy::SecretString;

/// Environment variables required by the demo/conformance runner. All are
/// mandatory; startup fails listing every missing one rather than operating
/// partially.
pub const REQUIRED_VARS: [&str; 8] = [
    "LEDGER_PREFIX",
    "LEDGER_BASE_URI",
    "LEDGER_ADMIN_USERNAME",
    "LEDGER_ADMIN_PASSWORD",
    "LEDGER_ACCOUNT_1",
    "LEDGER_PASSWORD_1",
    "LEDGER_ACCOUNT_2",
    "LEDGER_PASSWORD_2",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable(s): {}", .0.join(", "))]
    Missing(Vec<String>),
}

/// Process-boundary configuration for one ledger and two managed accounts.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    pub prefix: String,
    pub base_uri: String,
    pub admin_username: String,
    pub admin_password: SecretString,
    pub account_1: String,
    pub password_1: SecretString,
    pub account_2: String,
    pub password_2: SecretString,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary lookup so tests don't mutate process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut get = |name: &str| match lookup(name) {
            Some(v) if !v.is_empty() => v,
            _ => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let config = Self {
            prefix: get("LEDGER_PREFIX"),
            base_uri: get("LEDGER_BASE_URI"),
            admin_username: get("LEDGER_ADMIN_USERNAME"),
            admin_password: SecretString::from(get("LEDGER_ADMIN_PASSWORD")),
            account_1: get("LEDGER_ACCOUNT_1"),
            password_1: SecretString::from(get("LEDGER_PASSWORD_1")),
            account_2: get("LEDGER_ACCOUNT_2"),
            password_2: SecretString::from(get("LEDGER_PASSWORD_2")),
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}
