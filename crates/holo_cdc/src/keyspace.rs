//! Keyspace metadata cache with periodic refresh.
//!
//! Next-gen deployments host many isolated keyspaces; every span carries a
//! keyspace id that resolves to metadata held by the placement driver. The
//! manager caches metadata by name and by id and refreshes every cached
//! keyspace on a timer. Classic deployments have exactly one keyspace and
//! never talk to the placement driver.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::DEFAULT_KEYSPACE;
use crate::retry::{deserialize_millis, retry, RetryPolicy};

/// Floor for the refresher period; `tokio::time::interval` rejects zero.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of a keyspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyspaceState {
    #[default]
    Enabled,
    Disabled,
    Archived,
    Tombstone,
}

/// Keyspace metadata as stored by the placement driver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceMeta {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub state: KeyspaceState,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Unix seconds.
    #[serde(default)]
    pub state_changed_at: i64,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl KeyspaceMeta {
    /// The implicit keyspace of classic deployments.
    pub fn default_keyspace() -> Self {
        Self {
            name: DEFAULT_KEYSPACE.to_string(),
            ..Self::default()
        }
    }
}

/// Placement-driver calls the manager depends on.
#[async_trait]
pub trait KeyspaceMetaClient: Send + Sync {
    async fn load_keyspace(&self, name: &str) -> anyhow::Result<KeyspaceMeta>;
    async fn keyspace_by_id(&self, keyspace_id: u32) -> anyhow::Result<KeyspaceMeta>;
}

/// Storage kernel flavour of the upstream cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelType {
    /// Single implicit keyspace.
    #[default]
    Classic,
    /// Isolated keyspaces resolved through the placement driver.
    NextGen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyspaceManagerConfig {
    pub kernel: KernelType,
    #[serde(rename = "refresh_interval_ms", deserialize_with = "deserialize_millis")]
    pub refresh_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for KeyspaceManagerConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Classic,
            refresh_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct KeyspaceCache {
    by_name: HashMap<String, Arc<KeyspaceMeta>>,
    by_id: HashMap<u32, Arc<KeyspaceMeta>>,
}

impl KeyspaceCache {
    fn insert(&mut self, meta: Arc<KeyspaceMeta>) {
        self.by_name.insert(meta.name.clone(), Arc::clone(&meta));
        self.by_id.insert(meta.id, meta);
    }
}

/// Caches keyspace metadata and keeps it fresh.
pub struct KeyspaceManager {
    client: Arc<dyn KeyspaceMetaClient>,
    cfg: KeyspaceManagerConfig,
    cache: Mutex<KeyspaceCache>,
    // One permit: a refresh that finds it taken skips its tick.
    refresh_gate: Semaphore,
}

impl KeyspaceManager {
    pub fn new(client: Arc<dyn KeyspaceMetaClient>, mut cfg: KeyspaceManagerConfig) -> Self {
        if cfg.refresh_interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                refresh_interval_ms = cfg.refresh_interval.as_millis() as u64,
                min_refresh_interval_ms = MIN_REFRESH_INTERVAL.as_millis() as u64,
                "keyspace refresh interval too small, clamping"
            );
            cfg.refresh_interval = MIN_REFRESH_INTERVAL;
        }
        Self {
            client,
            cfg,
            cache: Mutex::new(KeyspaceCache::default()),
            refresh_gate: Semaphore::new(1),
        }
    }

    pub fn kernel(&self) -> KernelType {
        self.cfg.kernel
    }

    /// Metadata for keyspace `name`, from cache or the placement driver.
    pub async fn load_keyspace(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> anyhow::Result<Arc<KeyspaceMeta>> {
        if self.cfg.kernel == KernelType::Classic {
            return Ok(Arc::new(KeyspaceMeta::default_keyspace()));
        }
        let cached = self.lock_cache().by_name.get(name).cloned();
        if let Some(meta) = cached {
            return Ok(meta);
        }
        self.force_load_keyspace(cancel, name).await
    }

    /// Metadata for `keyspace_id`, from cache or the placement driver.
    ///
    /// A concurrent lookup may fill the cache while this one is in flight;
    /// the cached entry then wins so callers share one `Arc`.
    pub async fn keyspace_by_id(
        &self,
        cancel: &CancellationToken,
        keyspace_id: u32,
    ) -> anyhow::Result<Arc<KeyspaceMeta>> {
        if self.cfg.kernel == KernelType::Classic {
            return Ok(Arc::new(KeyspaceMeta::default_keyspace()));
        }
        let cached = self.lock_cache().by_id.get(&keyspace_id).cloned();
        if let Some(meta) = cached {
            return Ok(meta);
        }

        let loaded = retry(&self.cfg.retry, cancel, |_| self.client.keyspace_by_id(keyspace_id))
            .await
            .with_context(|| format!("load keyspace {keyspace_id} from placement driver"));
        let meta = match loaded {
            Ok(meta) => meta,
            Err(err) => {
                tracing::error!(keyspace_id, error = ?err, "retry to load keyspace failed");
                return Err(err);
            }
        };

        let mut cache = self.lock_cache();
        if let Some(existing) = cache.by_id.get(&keyspace_id) {
            return Ok(Arc::clone(existing));
        }
        let meta = Arc::new(meta);
        cache.insert(Arc::clone(&meta));
        Ok(meta)
    }

    async fn force_load_keyspace(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> anyhow::Result<Arc<KeyspaceMeta>> {
        let loaded = retry(&self.cfg.retry, cancel, |_| self.client.load_keyspace(name))
            .await
            .with_context(|| format!("load keyspace {name} from placement driver"));
        let meta = match loaded {
            Ok(meta) => Arc::new(meta),
            Err(err) => {
                tracing::error!(keyspace = name, error = ?err, "retry to load keyspace failed");
                return Err(err);
            }
        };
        self.lock_cache().insert(Arc::clone(&meta));
        Ok(meta)
    }

    /// Reload every cached keyspace once.
    ///
    /// Returns `false` without doing anything when a refresh is already
    /// running. Per-keyspace failures are logged and keep the stale entry.
    pub async fn update(&self, cancel: &CancellationToken) -> bool {
        let Ok(_permit) = self.refresh_gate.try_acquire() else {
            tracing::info!("keyspace refresh still running, skipping");
            return false;
        };

        let names: Vec<String> = self.lock_cache().by_name.keys().cloned().collect();
        for name in &names {
            if let Err(err) = self.force_load_keyspace(cancel, name).await {
                tracing::warn!(keyspace = %name, error = ?err, "keyspace refresh failed");
            }
        }
        tracing::debug!(keyspaces = names.len(), "refreshed keyspace metadata");
        true
    }

    /// Start the periodic refresher. Classic deployments need none.
    pub fn spawn_refresh(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.cfg.kernel == KernelType::Classic {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the cache is fresh then.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.update(&cancel).await;
                    }
                }
            }
        }))
    }

    pub fn cached_keyspaces(&self) -> Vec<Arc<KeyspaceMeta>> {
        let mut out: Vec<_> = self.lock_cache().by_id.values().cloned().collect();
        out.sort_by_key(|meta| meta.id);
        out
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, KeyspaceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
