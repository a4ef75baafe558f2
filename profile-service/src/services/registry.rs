//! Document registry: one current stored object per (owner, slot).
//!
//! Writes follow a two-phase sequence. New bytes are stored under a fresh
//! key, then the descriptor is swapped to point at them, and only then is the
//! superseded object removed. Removal is cleanup; its failure is logged and
//! never undoes a successful upload.
//!
//! Every mutation of a slot holds that slot's lease, so uploads and deletes
//! for the same (owner, slot) are serialized while different slots and
//! different owners proceed in parallel.

use crate::models::{parse_object_key, DocumentSlot, StoredObjectDescriptor};
use crate::services::clock::Clock;
use crate::services::descriptor_store::DescriptorStore;
use crate::services::error::ServiceError;
use crate::services::storage::{Storage, StorageError};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type SlotKey = (String, DocumentSlot);

#[derive(Default)]
struct SlotLocks {
    locks: DashMap<SlotKey, Arc<Mutex<()>>>,
}

impl SlotLocks {
    async fn acquire(self: &Arc<Self>, owner_id: &str, slot: DocumentSlot) -> SlotLease {
        let key = (owner_id.to_string(), slot);
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        SlotLease {
            locks: Arc::clone(self),
            key,
            guard: Some(guard),
        }
    }
}

/// Exclusive hold on one (owner, slot). Released on drop.
struct SlotLease {
    locks: Arc<SlotLocks>,
    key: SlotKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still references an idle lock.
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct RegistryInner {
    storage: Arc<dyn Storage>,
    descriptors: Arc<dyn DescriptorStore>,
    locks: Arc<SlotLocks>,
    max_upload_bytes: usize,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct DocumentRegistry {
    inner: Arc<RegistryInner>,
}

impl DocumentRegistry {
    pub fn new(
        storage: Arc<dyn Storage>,
        descriptors: Arc<dyn DescriptorStore>,
        max_upload_bytes: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                storage,
                descriptors,
                locks: Arc::new(SlotLocks::default()),
                max_upload_bytes,
                clock,
            }),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.inner.max_upload_bytes
    }

    /// Check a file against the slot's policy. Never touches storage.
    /// Returns the canonical content type.
    pub fn validate(
        &self,
        slot: DocumentSlot,
        content_type: &str,
        len: usize,
    ) -> Result<&'static str, ServiceError> {
        let canonical = slot
            .accept(content_type)
            .ok_or_else(|| ServiceError::UnsupportedType {
                slot,
                content_type: content_type.to_string(),
            })?;
        if len > self.inner.max_upload_bytes {
            return Err(ServiceError::PayloadTooLarge {
                limit: self.inner.max_upload_bytes,
                actual: len,
            });
        }
        if len == 0 {
            return Err(ServiceError::validation(slot.as_str(), "file is empty"));
        }
        Ok(canonical)
    }

    /// Lease `slots` for `owner_id` and open a batch of uploads against them.
    pub async fn begin(&self, owner_id: &str, slots: &[DocumentSlot]) -> UploadBatch {
        let mut ordered = slots.to_vec();
        ordered.sort();
        ordered.dedup();

        // Fixed acquisition order keeps concurrent batches deadlock free.
        let mut leases = Vec::with_capacity(ordered.len());
        for slot in ordered {
            leases.push(self.inner.locks.acquire(owner_id, slot).await);
        }

        UploadBatch {
            registry: self.clone(),
            owner_id: owner_id.to_string(),
            leases,
            staged: BTreeMap::new(),
        }
    }

    /// Store a single document in `slot`, replacing any previous one.
    pub async fn upload(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<StoredObjectDescriptor, ServiceError> {
        let content_type = self.validate(slot, content_type, bytes.len())?;
        let registry = self.clone();
        let owner_id = owner_id.to_string();

        // Runs to completion even if the caller goes away.
        tokio::spawn(async move {
            let mut batch = registry.begin(&owner_id, &[slot]).await;
            let staged = batch.stage(slot, bytes, content_type).await.map(|_| ());
            if let Err(e) = staged {
                batch.abort().await;
                return Err(e);
            }
            let committed = batch.commit().await?;
            let mut descriptors = committed.finish().await;
            descriptors
                .pop()
                .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("upload produced no descriptor")))
        })
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("upload task failed: {}", e)))?
    }

    pub async fn get_metadata(
        &self,
        owner_id: &str,
    ) -> Result<BTreeMap<DocumentSlot, StoredObjectDescriptor>, ServiceError> {
        let descriptors = self
            .inner
            .descriptors
            .list(owner_id)
            .await
            .map_err(ServiceError::Persistence)?;
        Ok(descriptors.into_iter().map(|d| (d.slot, d)).collect())
    }

    /// One fresh URL per populated slot; an owner without documents gets an
    /// empty map.
    pub async fn get_urls(
        &self,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<BTreeMap<DocumentSlot, String>, ServiceError> {
        let descriptors = self.get_metadata(owner_id).await?;
        let storage = &self.inner.storage;

        let urls = try_join_all(descriptors.into_values().map(|d| async move {
            match storage.presign(&d.key, ttl).await {
                Ok(url) => Ok(Some((d.slot, url))),
                Err(StorageError::NotFound(_)) => {
                    tracing::error!(key = %d.key, slot = %d.slot, "Descriptor points at a missing object");
                    Ok(None)
                }
                Err(e) => Err(storage_failure(e)),
            }
        }))
        .await?;

        Ok(urls.into_iter().flatten().collect())
    }

    pub async fn delete(&self, owner_id: &str, slot: DocumentSlot) -> Result<(), ServiceError> {
        let registry = self.clone();
        let owner_id = owner_id.to_string();

        tokio::spawn(async move {
            let _lease = registry.inner.locks.acquire(&owner_id, slot).await;
            let inner = &registry.inner;

            let current = inner
                .descriptors
                .remove(&owner_id, slot)
                .await
                .map_err(ServiceError::Persistence)?
                .ok_or(ServiceError::NotFound(slot))?;

            // The slot already reads as empty; the object is cleanup.
            if let Err(e) = inner.storage.delete(&current.key).await {
                tracing::warn!(
                    owner_id = %owner_id,
                    slot = %slot,
                    key = %current.key,
                    error = %e,
                    "Deleted document's object was not removed"
                );
            }

            metrics::counter!("document_deletes_total", "slot" => slot.as_str()).increment(1);
            tracing::info!(owner_id = %owner_id, slot = %slot, "Document deleted");
            Ok(())
        })
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("delete task failed: {}", e)))?
    }

    /// Bytes for `key`, provided it is the object currently held by its slot.
    pub async fn open(
        &self,
        key: &str,
    ) -> Result<Option<(StoredObjectDescriptor, Bytes)>, ServiceError> {
        let Some((owner_id, slot)) = parse_object_key(key) else {
            return Ok(None);
        };

        let current = self
            .inner
            .descriptors
            .get(owner_id, slot)
            .await
            .map_err(ServiceError::Persistence)?;
        let Some(descriptor) = current.filter(|d| d.key == key) else {
            return Ok(None);
        };

        match self.inner.storage.get(key).await {
            Ok(bytes) => Ok(Some((descriptor, bytes))),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(storage_failure(e)),
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.inner.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove object");
        }
    }
}

/// Uploads staged under held slot leases, not yet visible to readers.
pub struct UploadBatch {
    registry: DocumentRegistry,
    owner_id: String,
    leases: Vec<SlotLease>,
    staged: BTreeMap<DocumentSlot, StoredObjectDescriptor>,
}

impl UploadBatch {
    /// Write the bytes under a new key. The slot's descriptor is untouched.
    pub async fn stage(
        &mut self,
        slot: DocumentSlot,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<&StoredObjectDescriptor, ServiceError> {
        if !self.leases.iter().any(|lease| lease.key.1 == slot) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "slot {} was not leased for this batch",
                slot
            )));
        }
        let content_type = self.registry.validate(slot, content_type, bytes.len())?;

        let inner = &self.registry.inner;
        let content_hash = hex::encode(Sha256::digest(&bytes));
        let created_at = inner.clock.now();
        let object_id = format!("{}-{}", created_at.timestamp_millis(), &content_hash[..16]);
        let key = StoredObjectDescriptor::object_key(&self.owner_id, slot, &object_id);

        inner
            .storage
            .put(&key, bytes.clone(), content_type)
            .await
            .map_err(storage_failure)?;

        let descriptor = StoredObjectDescriptor {
            owner_id: self.owner_id.clone(),
            slot,
            key,
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            content_hash,
            created_at,
        };

        if let Some(replaced) = self.staged.insert(slot, descriptor) {
            let current_key = self.staged.get(&slot).map(|d| d.key.as_str());
            if current_key != Some(replaced.key.as_str()) {
                self.registry.discard(&replaced.key).await;
            }
        }

        self.staged
            .get(&slot)
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("staged descriptor missing")))
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Drop everything staged so far.
    pub async fn abort(self) {
        for descriptor in self.staged.values() {
            self.registry.discard(&descriptor.key).await;
        }
    }

    /// Point each slot at its staged object. Either every swap lands or
    /// none does.
    pub async fn commit(self) -> Result<CommittedBatch, ServiceError> {
        let inner = &self.registry.inner;
        let mut swapped: Vec<(StoredObjectDescriptor, Option<StoredObjectDescriptor>)> =
            Vec::with_capacity(self.staged.len());

        for descriptor in self.staged.values() {
            match inner.descriptors.swap(descriptor.clone()).await {
                Ok(previous) => swapped.push((descriptor.clone(), previous)),
                Err(e) => {
                    tracing::error!(
                        owner_id = %self.owner_id,
                        slot = %descriptor.slot,
                        error = %e,
                        "Descriptor swap failed, reverting batch"
                    );
                    revert_swaps(&self.registry, &swapped).await;
                    for staged in self.staged.values() {
                        self.registry.discard(&staged.key).await;
                    }
                    return Err(ServiceError::Persistence(e));
                }
            }
        }

        Ok(CommittedBatch {
            registry: self.registry,
            owner_id: self.owner_id,
            _leases: self.leases,
            swapped,
        })
    }
}

/// Swapped descriptors whose superseded objects have not been removed yet.
pub struct CommittedBatch {
    registry: DocumentRegistry,
    owner_id: String,
    _leases: Vec<SlotLease>,
    swapped: Vec<(StoredObjectDescriptor, Option<StoredObjectDescriptor>)>,
}

impl CommittedBatch {
    pub fn descriptors(&self) -> impl Iterator<Item = &StoredObjectDescriptor> {
        self.swapped.iter().map(|(current, _)| current)
    }

    /// Restore the previous descriptors and drop the new objects.
    pub async fn rollback(self) {
        tracing::warn!(owner_id = %self.owner_id, "Rolling back committed uploads");
        revert_swaps(&self.registry, &self.swapped).await;
        for (current, previous) in &self.swapped {
            let reused = previous.as_ref().map(|p| p.key == current.key).unwrap_or(false);
            if !reused {
                self.registry.discard(&current.key).await;
            }
        }
    }

    /// Remove superseded objects and release the slots.
    pub async fn finish(self) -> Vec<StoredObjectDescriptor> {
        let mut current = Vec::with_capacity(self.swapped.len());
        for (descriptor, previous) in self.swapped {
            if let Some(previous) = previous.filter(|p| p.key != descriptor.key) {
                if let Err(e) = self.registry.inner.storage.delete(&previous.key).await {
                    tracing::warn!(
                        owner_id = %self.owner_id,
                        slot = %descriptor.slot,
                        key = %previous.key,
                        error = %e,
                        "Superseded object was not removed"
                    );
                }
            }
            metrics::counter!("document_uploads_total", "slot" => descriptor.slot.as_str())
                .increment(1);
            tracing::info!(
                owner_id = %self.owner_id,
                slot = %descriptor.slot,
                size = descriptor.size,
                "Document stored"
            );
            current.push(descriptor);
        }
        current
    }
}

async fn revert_swaps(
    registry: &DocumentRegistry,
    swapped: &[(StoredObjectDescriptor, Option<StoredObjectDescriptor>)],
) {
    let descriptors = &registry.inner.descriptors;
    for (current, previous) in swapped.iter().rev() {
        let result = match previous {
            Some(previous) => descriptors.swap(previous.clone()).await.map(|_| ()),
            None => descriptors
                .remove(&current.owner_id, current.slot)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            tracing::error!(
                owner_id = %current.owner_id,
                slot = %current.slot,
                error = %e,
                "Failed to revert descriptor"
            );
        }
    }
}

fn storage_failure(err: StorageError) -> ServiceError {
    ServiceError::StorageUnavailable(err.to_string())
}
