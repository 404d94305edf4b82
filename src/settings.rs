//! Persisted workflow settings.
//!
//! Stored at `{working_dir}/.tracker/settings.json`. When no file exists the
//! environment supplies the initial values:
//! - `TRACKER_SKIPPED_RESOLVES_PROJECT` - skipped phases count as resolved for project completion
//! - `TRACKER_COMPLETE_FROM_PENDING` - tasks may be completed without being started

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::notifications::Escalation;
use crate::workflow::WorkflowPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub policy: WorkflowPolicy,
    /// Reconnect delay growth; fixed interval when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_escalation: Option<Escalation>,
}

#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<WorkflowSettings>,
    storage_path: PathBuf,
}

impl SettingsStore {
    /// Load from disk, falling back to environment defaults.
    pub async fn new(working_dir: &Path) -> Self {
        let storage_path = working_dir.join(".tracker/settings.json");

        let settings = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(s) => {
                    tracing::info!("Loaded settings from {}", storage_path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load settings from {}: {:#}, using defaults",
                        storage_path.display(),
                        e
                    );
                    Self::defaults_from_env()
                }
            }
        } else {
            tracing::info!(
                "No settings file found at {}, using environment defaults",
                storage_path.display()
            );
            Self::defaults_from_env()
        };

        Self {
            settings: RwLock::new(settings),
            storage_path,
        }
    }

    fn defaults_from_env() -> WorkflowSettings {
        let defaults = WorkflowPolicy::default();
        WorkflowSettings {
            policy: WorkflowPolicy {
                skipped_phase_resolves_project: env_flag(
                    "TRACKER_SKIPPED_RESOLVES_PROJECT",
                    defaults.skipped_phase_resolves_project,
                ),
                allow_complete_from_pending: env_flag(
                    "TRACKER_COMPLETE_FROM_PENDING",
                    defaults.allow_complete_from_pending,
                ),
            },
            reconnect_escalation: None,
        }
    }

    fn load_from_path(path: &Path) -> anyhow::Result<WorkflowSettings> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    async fn save_to_disk(&self) -> anyhow::Result<()> {
        let settings = self.settings.read().await;

        if let Some(parent) = self.storage_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(&*settings)?;
        tokio::fs::write(&self.storage_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.storage_path.display()))?;
        tracing::debug!("Saved settings to {}", self.storage_path.display());
        Ok(())
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub async fn get(&self) -> WorkflowSettings {
        self.settings.read().await.clone()
    }

    pub async fn policy(&self) -> WorkflowPolicy {
        self.settings.read().await.policy
    }

    pub async fn reconnect_escalation(&self) -> Option<Escalation> {
        self.settings.read().await.reconnect_escalation
    }

    /// Returns the previous policy if it changed.
    pub async fn set_policy(
        &self,
        policy: WorkflowPolicy,
    ) -> anyhow::Result<Option<WorkflowPolicy>> {
        let mut settings = self.settings.write().await;
        let previous = settings.policy;
        if previous == policy {
            return Ok(None);
        }
        settings.policy = policy;
        drop(settings);
        self.save_to_disk().await?;
        Ok(Some(previous))
    }

    pub async fn update(&self, new_settings: WorkflowSettings) -> anyhow::Result<()> {
        *self.settings.write().await = new_settings;
        self.save_to_disk().await
    }

    /// Re-read the file, keeping current values when it is absent.
    pub async fn reload(&self) -> anyhow::Result<()> {
        if self.storage_path.exists() {
            let loaded = Self::load_from_path(&self.storage_path)?;
            *self.settings.write().await = loaded;
            tracing::info!("Reloaded settings from {}", self.storage_path.display());
        }
        Ok(())
    }
}

fn env_flag(var: &str, default: bool) -> bool {
    parse_flag(std::env::var(var).ok().as_deref(), default)
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
