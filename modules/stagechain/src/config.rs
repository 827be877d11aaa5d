use std::env;

use tracing::info;

/// Process-level configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default for [`Options::strict`](crate::Options::strict): report delegation
    /// on a stopped stage as an error instead of returning quietly.
    pub strict: bool,

    // CLI
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict: false,
            prompt: "> ".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Missing vars fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            strict: env_flag("STAGECHAIN_STRICT").unwrap_or(defaults.strict),
            prompt: env::var("STAGECHAIN_PROMPT").unwrap_or(defaults.prompt),
        }
    }

    /// Log the loaded values.
    pub fn log_summary(&self) {
        info!(strict = self.strict, prompt = self.prompt.as_str(), "Loaded config");
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    parse_flag(&raw)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
