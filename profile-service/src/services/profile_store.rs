use crate::models::ProfileRecord;
use crate::services::database::MongoDb;
use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndReplaceOptions, ReturnDocument};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, owner_id: &str) -> Result<Option<ProfileRecord>, anyhow::Error>;

    /// Upsert, returning the record that was replaced.
    async fn put(&self, record: ProfileRecord) -> Result<Option<ProfileRecord>, anyhow::Error>;

    async fn delete(&self, owner_id: &str) -> Result<(), anyhow::Error>;

    /// Put back the state observed before a failed update.
    async fn restore(
        &self,
        owner_id: &str,
        previous: Option<ProfileRecord>,
    ) -> Result<(), anyhow::Error> {
        match previous {
            Some(record) => self.put(record).await.map(|_| ()),
            None => self.delete(owner_id).await,
        }
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    records: DashMap<String, ProfileRecord>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, owner_id: &str) -> Result<Option<ProfileRecord>, anyhow::Error> {
        Ok(self.records.get(owner_id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: ProfileRecord) -> Result<Option<ProfileRecord>, anyhow::Error> {
        Ok(self.records.insert(record.owner_id.clone(), record))
    }

    async fn delete(&self, owner_id: &str) -> Result<(), anyhow::Error> {
        self.records.remove(owner_id);
        Ok(())
    }
}

pub struct MongoProfileStore {
    db: MongoDb,
}

impl MongoProfileStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileStore for MongoProfileStore {
    async fn get(&self, owner_id: &str) -> Result<Option<ProfileRecord>, anyhow::Error> {
        self.db
            .profiles()
            .find_one(doc! { "owner_id": owner_id }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load profile: {}", e))
    }

    async fn put(&self, record: ProfileRecord) -> Result<Option<ProfileRecord>, anyhow::Error> {
        let options = FindOneAndReplaceOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();
        self.db
            .profiles()
            .find_one_and_replace(doc! { "owner_id": &record.owner_id }, &record, options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store profile: {}", e))
    }

    async fn delete(&self, owner_id: &str) -> Result<(), anyhow::Error> {
        self.db
            .profiles()
            .delete_one(doc! { "owner_id": owner_id }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete profile: {}", e))?;
        Ok(())
    }
}
