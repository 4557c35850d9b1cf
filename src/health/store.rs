//! Persisted health counters.
//!
//! A JSON object mapping server id to [`HealthSnapshot`]. A missing file
//! is an empty store; writes go to a temporary file first and are renamed
//! into place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::health::tracker::HealthSnapshot;
use crate::lifecycle::Shutdown;
use crate::registry::pool::ServerRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stats file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stats file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Health snapshots keyed by server id.
#[derive(Debug, Default, Clone)]
pub struct StatsStore {
    pub servers: HashMap<String, HealthSnapshot>,
}

impl StatsStore {
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let servers = serde_json::from_str(&content)?;
        Ok(Self { servers })
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.servers)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Capture the current counters of every server in the registry.
    pub fn capture(registry: &ServerRegistry) -> Self {
        Self {
            servers: registry.health_snapshots(),
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Load persisted counters into the registry. Failures are logged, not fatal.
pub fn restore(registry: &ServerRegistry, path: &Path) {
    match StatsStore::load_from_file(path) {
        Ok(store) => {
            let restored = registry.restore_health(&store.servers);
            tracing::info!(path = ?path, restored, "Server stats restored");
        }
        Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to read server stats"),
    }
}

/// Save the registry's counters once, logging the outcome.
pub fn save(registry: &ServerRegistry, path: &Path) {
    let store = StatsStore::capture(registry);
    match store.save_to_file(path) {
        Ok(()) => tracing::debug!(path = ?path, servers = store.len(), "Server stats saved"),
        Err(e) => tracing::error!(path = ?path, error = %e, "Failed to save server stats"),
    }
}

/// Save every `interval` until shutdown, then once more.
pub async fn run_saver(
    registry: Arc<ServerRegistry>,
    path: PathBuf,
    interval: Duration,
    shutdown: Shutdown,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => save(&registry, &path),
            _ = shutdown_rx.recv() => break,
        }
    }
    save(&registry, &path);
}
