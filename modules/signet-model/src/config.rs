use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// When enabled, a successful login notifies other live flows on the
    /// same device through the channel layer.
    pub refresh_flows_after_auth: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            refresh_flows_after_auth: env_flag("SIGNET_REFRESH_FLOWS_AFTER_AUTH"),
        }
    }
}

/// Runtime feature toggles handed to lifecycle rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
    pub refresh_flows_after_auth: bool,
}

impl From<&Config> for FeatureFlags {
    fn from(config: &Config) -> Self {
        Self {
            refresh_flows_after_auth: config.refresh_flows_after_auth,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
