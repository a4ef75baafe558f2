//! Persistence of the current descriptor per (owner, slot).

use crate::models::{DocumentSlot, StoredObjectDescriptor};
use crate::services::database::MongoDb;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndReplaceOptions, ReturnDocument};

#[async_trait]
pub trait DescriptorStore: Send + Sync {
    async fn get(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error>;

    async fn list(&self, owner_id: &str) -> Result<Vec<StoredObjectDescriptor>, anyhow::Error>;

    /// Make `descriptor` current for its slot, returning whatever it replaced.
    async fn swap(
        &self,
        descriptor: StoredObjectDescriptor,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error>;

    async fn remove(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error>;
}

#[derive(Default)]
pub struct MemoryDescriptorStore {
    entries: DashMap<(String, DocumentSlot), StoredObjectDescriptor>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn get(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        Ok(self
            .entries
            .get(&(owner_id.to_string(), slot))
            .map(|entry| entry.value().clone()))
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<StoredObjectDescriptor>, anyhow::Error> {
        let mut found: Vec<_> = DocumentSlot::ALL
            .iter()
            .filter_map(|slot| {
                self.entries
                    .get(&(owner_id.to_string(), *slot))
                    .map(|entry| entry.value().clone())
            })
            .collect();
        found.sort_by_key(|d| d.slot);
        Ok(found)
    }

    async fn swap(
        &self,
        descriptor: StoredObjectDescriptor,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        let key = (descriptor.owner_id.clone(), descriptor.slot);
        Ok(self.entries.insert(key, descriptor))
    }

    async fn remove(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        Ok(self
            .entries
            .remove(&(owner_id.to_string(), slot))
            .map(|(_, descriptor)| descriptor))
    }
}

pub struct MongoDescriptorStore {
    db: MongoDb,
}

impl MongoDescriptorStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DescriptorStore for MongoDescriptorStore {
    async fn get(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        self.db
            .descriptors()
            .find_one(doc! { "owner_id": owner_id, "slot": slot.as_str() }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load descriptor: {}", e))
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<StoredObjectDescriptor>, anyhow::Error> {
        let cursor = self
            .db
            .descriptors()
            .find(doc! { "owner_id": owner_id }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list descriptors: {}", e))?;
        let mut found: Vec<StoredObjectDescriptor> = cursor
            .try_collect()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read descriptors: {}", e))?;
        found.sort_by_key(|d| d.slot);
        Ok(found)
    }

    async fn swap(
        &self,
        descriptor: StoredObjectDescriptor,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        let options = FindOneAndReplaceOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();
        self.db
            .descriptors()
            .find_one_and_replace(
                doc! { "owner_id": &descriptor.owner_id, "slot": descriptor.slot.as_str() },
                &descriptor,
                options,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store descriptor: {}", e))
    }

    async fn remove(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<Option<StoredObjectDescriptor>, anyhow::Error> {
        self.db
            .descriptors()
            .find_one_and_delete(doc! { "owner_id": owner_id, "slot": slot.as_str() }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove descriptor: {}", e))
    }
}
