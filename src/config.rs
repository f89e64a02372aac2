//! Process configuration read from the environment

use crate::llm::DEFAULT_ENDPOINT;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// `SQLite` file holding nodes and settings
    pub db_path: PathBuf,
    /// Chat completions URL
    pub endpoint: String,
    /// Credential used when the stored settings carry none
    pub api_key: Option<String>,
    /// Abort generations running longer than this
    pub task_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("FORKCHAT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".forkchat").join("forkchat.db")
            },
            PathBuf::from,
        );

        let task_timeout = var("FORKCHAT_TASK_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            db_path,
            endpoint: var("FORKCHAT_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key: var("OPENAI_API_KEY").filter(|k| !k.is_empty()),
            task_timeout,
        }
    }
}
