//! Session-scoped storage with per-site partitions, and the preview token store on top.

use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use pv_payload::PreviewPayload;
use pv_payload::PreviewToken;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Key/value interface over a browsing context's session storage.
pub trait SessionStore {
    fn get_item(&self, key: &str) -> Option<String>;

    /// Fails with [`ErrorKind::StorageQuota`] when the write would exceed capacity.
    fn set_item(&mut self, key: &str, value: &str) -> PreviewResult<()>;
}

/// Session storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStorageConfig {
    pub partition_by_top_level_site: bool,
    pub quota_bytes: usize,
}

impl Default for SessionStorageConfig {
    fn default() -> Self {
        Self {
            partition_by_top_level_site: true,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

type PartitionMap = BTreeMap<String, BTreeMap<String, String>>;

/// In-memory session storage shared by every context of one browsing session.
///
/// Entries live until the value is dropped; nothing touches disk.
#[derive(Debug, Clone, Default)]
pub struct SessionStorage {
    config: SessionStorageConfig,
    partitions: Arc<Mutex<PartitionMap>>,
}

impl SessionStorage {
    pub fn new(config: SessionStorageConfig) -> Self {
        Self {
            config,
            partitions: Arc::default(),
        }
    }

    pub fn config(&self) -> &SessionStorageConfig {
        &self.config
    }

    /// Storage area seen by a context whose top-level site is `top_level_site`.
    pub fn area(&self, top_level_site: &str) -> SessionArea {
        let partition = if self.config.partition_by_top_level_site {
            sanitize_partition_name(top_level_site)
        } else {
            "global".to_owned()
        };

        SessionArea {
            partition,
            quota_bytes: self.config.quota_bytes,
            partitions: Arc::clone(&self.partitions),
        }
    }
}

/// Handle onto one storage partition.
#[derive(Debug, Clone)]
pub struct SessionArea {
    partition: String,
    quota_bytes: usize,
    partitions: Arc<Mutex<PartitionMap>>,
}

impl SessionArea {
    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn used_bytes(&self) -> usize {
        self.lock()
            .get(&self.partition)
            .map(partition_bytes)
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, PartitionMap> {
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for SessionArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.lock()
            .get(&self.partition)
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> PreviewResult<()> {
        let mut partitions = self.lock();
        let entries = partitions.entry(self.partition.clone()).or_default();

        let replaced = entries
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or_default();
        let projected = partition_bytes(entries)
            .saturating_sub(replaced)
            .saturating_add(key.len() + value.len());

        if projected > self.quota_bytes {
            return Err(PreviewError::new(
                ErrorKind::StorageQuota,
                "storage.quota_exceeded",
                format!(
                    "session storage partition `{}` would hold {projected} bytes (quota {})",
                    self.partition, self.quota_bytes
                ),
            ));
        }

        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

fn partition_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries
        .iter()
        .map(|(key, value)| key.len() + value.len())
        .sum()
}

fn sanitize_partition_name(input: &str) -> String {
    let mut out = String::new();
    for ch in input.trim().to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() {
        "unknown".to_owned()
    } else {
        out
    }
}

/// Serialized payloads keyed by preview token.
///
/// There is no update or delete; entries go away with the session.
#[derive(Debug, Clone)]
pub struct PreviewTokenStore<S> {
    store: S,
}

impl<S: SessionStore> PreviewTokenStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn put(&mut self, token: &PreviewToken, payload: &PreviewPayload) -> PreviewResult<()> {
        let encoded = payload.encode()?;
        self.store.set_item(&token.storage_key(), &encoded)?;
        tracing::debug!(token = %token, bytes = encoded.len(), "stored preview payload");
        Ok(())
    }

    /// Raw serialized payload, if this context's storage holds one for `token`.
    pub fn get(&self, token: &PreviewToken) -> Option<String> {
        self.store.get_item(&token.storage_key())
    }

    /// Reads and decodes in one step; malformed entries read as absent.
    pub fn load(&self, token: &PreviewToken) -> Option<PreviewPayload> {
        PreviewPayload::decode(self.get(token).as_deref())
    }

    pub fn inner(&self) -> &S {
        &self.store
    }
}
