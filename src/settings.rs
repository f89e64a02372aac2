//! User settings consulted when a generation is issued
//!
//! Persisted as one record under [`SETTINGS_KEY`]; fields missing from the
//! stored record fall back to their defaults.

use crate::llm::default_model;
use crate::reactive::{ReactiveCell, Subscription};
use crate::store::{RecordStore, RecordStoreExt, StoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reserved record key for settings
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model().id.to_string(),
            max_tokens: 1024,
            temperature: 1.0,
            api_key: None,
        }
    }
}

/// Observable, persisted settings
pub struct SettingsStore {
    records: Arc<dyn RecordStore>,
    cell: ReactiveCell<Settings>,
}

impl SettingsStore {
    /// Load settings from `records`, defaulting anything not stored
    pub fn load(records: Arc<dyn RecordStore>) -> Self {
        let settings: Settings = records.get(SETTINGS_KEY);
        Self {
            records,
            cell: ReactiveCell::new(settings),
        }
    }

    pub fn get(&self) -> Settings {
        self.cell.get()
    }

    /// Persist `settings` and notify listeners
    pub fn set(&self, settings: Settings) -> StoreResult<()> {
        self.records.set(SETTINGS_KEY, &settings)?;
        tracing::debug!(model = %settings.model, max_tokens = settings.max_tokens, "Settings updated");
        self.cell.set(move |_| settings);
        Ok(())
    }

    /// Apply `change` to the current settings and persist the result
    pub fn update(&self, change: impl FnOnce(&mut Settings)) -> StoreResult<()> {
        let mut settings = self.get();
        change(&mut settings);
        self.set(settings)
    }

    pub fn subscribe(&self, listener: impl Fn(&Settings) + Send + Sync + 'static) -> Subscription {
        self.cell.subscribe(listener)
    }
}
