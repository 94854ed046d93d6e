//! Keyed cache of live sandboxes
//!
//! Lookup-and-create is single-flight per key: concurrent requesters of a key
//! whose sandbox is still being created wait on the same creation instead of
//! starting their own. Each requester holds a `SandboxLease` from the moment
//! its use is counted. The last lease to go, whether released or dropped,
//! evicts the entry and removes the sandbox. A failed creation leaves no
//! sandbox to remove.
//!
//! Creation runs as its own task, so a sandbox whose requesters all went away
//! mid-creation is still created and then removed by the last lease.
//!
//! With `RegistryKeyMode::StagedPath` the key embeds the per-request staging
//! path, so every request creates a fresh sandbox. `RegistryKeyMode::ContentHash`
//! keys on the code itself and lets identical in-flight requests share one.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::IsolationBackend;
use crate::config::RegistryKeyMode;
use crate::errors::EngineError;
use crate::staging::EphemeralCodeFile;
use crate::types::{Language, SandboxHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey(String);

impl RegistryKey {
    pub fn for_request(
        mode: RegistryKeyMode,
        code_file: &EphemeralCodeFile,
        code: &str,
        use_hardened_runtime: bool,
    ) -> Self {
        match mode {
            RegistryKeyMode::StagedPath => Self::staged_path(
                &code_file.path().to_string_lossy(),
                code_file.language(),
                use_hardened_runtime,
            ),
            RegistryKeyMode::ContentHash => {
                Self::content_hash(code, code_file.language(), use_hardened_runtime)
            }
        }
    }

    pub fn staged_path(path: &str, language: Language, use_hardened_runtime: bool) -> Self {
        RegistryKey(format!("{}_{}_{}", path, language, use_hardened_runtime))
    }

    pub fn content_hash(code: &str, language: Language, use_hardened_runtime: bool) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hasher.update([0u8]);
        hasher.update(language.as_str().as_bytes());
        hasher.update([use_hardened_runtime as u8]);
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        RegistryKey(format!("sha256:{}", hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

type Creation = Shared<BoxFuture<'static, Result<SandboxHandle, Arc<EngineError>>>>;

struct Slot {
    creation: Creation,
    users: usize,
}

#[derive(Default)]
pub struct SandboxRegistry {
    slots: Mutex<HashMap<RegistryKey, Slot>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one use of the sandbox cached under `key`, starting its creation
    /// on `backend` if absent.
    pub async fn acquire(
        self: &Arc<Self>,
        key: RegistryKey,
        backend: Arc<dyn IsolationBackend>,
        code_file: &EphemeralCodeFile,
    ) -> SandboxLease {
        let mut slots = self.slots.lock().await;
        let slot = match slots.entry(key.clone()) {
            Entry::Occupied(entry) => {
                log::info!("Reusing container for {}", key.as_str());
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                log::info!("Creating new container for {}", key.as_str());
                entry.insert(Slot {
                    creation: spawn_creation(backend.clone(), code_file.detached_copy()),
                    users: 0,
                })
            }
        };
        slot.users += 1;

        SandboxLease {
            registry: self.clone(),
            backend,
            key,
            creation: slot.creation.clone(),
            released: false,
        }
    }

    /// Drop one use of `key`; true when it was the last and the entry is gone.
    async fn release(&self, key: &RegistryKey) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = match slots.get_mut(key) {
            Some(slot) => slot,
            None => return false,
        };
        slot.users = slot.users.saturating_sub(1);
        if slot.users > 0 {
            return false;
        }
        slots.remove(key);
        true
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

fn spawn_creation(backend: Arc<dyn IsolationBackend>, code_file: EphemeralCodeFile) -> Creation {
    let task = tokio::spawn(async move { backend.create(&code_file).await });
    async move {
        match task.await {
            Ok(result) => result.map_err(Arc::new),
            Err(e) => Err(Arc::new(EngineError::SandboxCreation(format!(
                "Creation task failed: {}",
                e
            )))),
        }
    }
    .boxed()
    .shared()
}

/// One counted use of a registry entry.
///
/// `release` gives the use back and removes the sandbox when this was its last
/// user. A lease dropped without being released, because the execution future
/// was cancelled, spawns the same cleanup onto the current runtime.
pub struct SandboxLease {
    registry: Arc<SandboxRegistry>,
    backend: Arc<dyn IsolationBackend>,
    key: RegistryKey,
    creation: Creation,
    released: bool,
}

impl SandboxLease {
    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    /// Wait until the sandbox exists.
    pub async fn sandbox(&self) -> Result<SandboxHandle, Arc<EngineError>> {
        self.creation.clone().await
    }

    pub async fn release(mut self) {
        self.released = true;
        release_and_remove(
            &self.registry,
            self.backend.as_ref(),
            &self.key,
            self.creation.clone(),
        )
        .await;
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let registry = self.registry.clone();
        let backend = self.backend.clone();
        let key = self.key.clone();
        let creation = self.creation.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log::warn!(
                    "Execution abandoned; releasing {} in the background",
                    key.as_str()
                );
                runtime.spawn(async move {
                    release_and_remove(&registry, backend.as_ref(), &key, creation).await;
                });
            }
            Err(_) => log::error!(
                "No runtime available to release {}; its container is leaked",
                self.key.as_str()
            ),
        }
    }
}

async fn release_and_remove(
    registry: &SandboxRegistry,
    backend: &dyn IsolationBackend,
    key: &RegistryKey,
    creation: Creation,
) {
    if !registry.release(key).await {
        log::debug!(
            "{} is still in use; removal left to its last user",
            key.as_str()
        );
        return;
    }

    // Resolves at once unless every user gave up while the sandbox was being created
    let handle = match creation.await {
        Ok(handle) => handle,
        Err(_) => return,
    };

    match backend.remove(&handle).await {
        Ok(()) => log::debug!("Removed container {}", handle.id),
        // Never surfaced and never retried
        Err(e) => log::error!("Error cleaning up container {}: {}", handle.id, e),
    }
}
