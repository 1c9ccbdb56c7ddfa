//! Wiring from configuration to a live repository.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use questmap_config::{QuestmapConfig, StoreBackend};
use questmap_core::{InMemoryMarkerStore, MarkerRepository, MarkerStore, SyncSession};
use questmap_firestore::{FirestoreSettings, FirestoreStore};
use tracing::{debug, info};

/// How long a one-shot command waits for the first snapshot.
const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(15);

/// Store, repository and configuration for one process.
pub struct App {
    config: QuestmapConfig,
    repository: Arc<MarkerRepository>,
}

impl App {
    pub fn new(config: QuestmapConfig) -> Result<Self> {
        let store = build_store(&config)?;
        Ok(Self::with_store(config, store))
    }

    /// Use an already constructed store, ignoring `[store] backend`.
    pub fn with_store(config: QuestmapConfig, store: Arc<dyn MarkerStore>) -> Self {
        let repository = Arc::new(MarkerRepository::new(store, config.query_scope()));
        Self { config, repository }
    }

    pub fn config(&self) -> &QuestmapConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<MarkerRepository> {
        &self.repository
    }

    pub fn session(&self) -> SyncSession {
        SyncSession::with_options(Arc::clone(&self.repository), self.config.session_options())
    }

    /// Activate a session and wait until its first batch reached the mirror.
    pub async fn synced_session(&self) -> Result<SyncSession> {
        let mut snapshots = self.repository.watch();
        let mut session = self.session();
        session
            .activate()
            .await
            .context("Failed to subscribe to the marker store")?;

        tokio::time::timeout(INITIAL_SYNC_TIMEOUT, snapshots.changed())
            .await
            .context("Timed out waiting for the initial marker snapshot")?
            .context("Marker repository closed")?;
        debug!(markers = self.repository.len(), "Initial snapshot applied");
        Ok(session)
    }
}

/// Build the store named by `[store] backend`.
pub fn build_store(config: &QuestmapConfig) -> Result<Arc<dyn MarkerStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store, markers live only as long as this process");
            Ok(Arc::new(InMemoryMarkerStore::new()))
        }
        StoreBackend::Firestore => {
            let settings = FirestoreSettings::from_config(config)?;
            let store =
                FirestoreStore::connect(settings).context("Failed to build Firestore client")?;
            Ok(Arc::new(store))
        }
    }
}
