//! JSON file alert store.
//!
//! Layout: `{ "<channel_id>": [ {ticker, alert_type, value, reference_price,
//! created_at, channel_id}, ... ], ... }`. Writes go to a sibling temp file
//! that is then renamed over the target.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::traits::AlertStore;
use crate::types::{Alert, ChannelId};

pub struct JsonAlertStore {
    path: PathBuf,
}

impl JsonAlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "alerts.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AlertStore for JsonAlertStore {
    async fn load(&self) -> Result<BTreeMap<ChannelId, Vec<Alert>>, PersistenceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No alerts file found at {}", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        // JSON object keys are strings; parse them back into channel ids.
        let by_key: BTreeMap<String, Vec<Alert>> = serde_json::from_slice(&raw)?;
        let mut alerts = BTreeMap::new();
        for (key, list) in by_key {
            match key.parse::<u64>() {
                Ok(id) => {
                    alerts.insert(ChannelId(id), list);
                }
                Err(_) => tracing::warn!("Skipping alerts under invalid channel key {:?}", key),
            }
        }

        let count: usize = alerts.values().map(Vec::len).sum();
        tracing::info!("Loaded {} price alerts from {}", count, self.path.display());
        Ok(alerts)
    }

    async fn save(&self, alerts: &BTreeMap<ChannelId, Vec<Alert>>) -> Result<(), PersistenceError> {
        let by_key: BTreeMap<String, &Vec<Alert>> = alerts
            .iter()
            .map(|(channel, list)| (channel.to_string(), list))
            .collect();
        let body = serde_json::to_vec_pretty(&by_key)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        let count: usize = alerts.values().map(Vec::len).sum();
        tracing::debug!("Saved {} price alerts to {}", count, self.path.display());
        Ok(())
    }
}
