use crate::models::{ProfileRecord, StoredObjectDescriptor};
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for profile-service");

        // At most one current descriptor per (owner, slot)
        let slot_index = IndexModel::builder()
            .keys(doc! { "owner_id": 1, "slot": 1 })
            .options(
                IndexOptions::builder()
                    .name("owner_slot_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.descriptors()
            .create_index(slot_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create owner_slot index on descriptors: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on document_descriptors.(owner_id, slot)");

        let owner_index = IndexModel::builder()
            .keys(doc! { "owner_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("owner_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.profiles()
            .create_index(owner_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create owner index on profiles: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on profiles.owner_id");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn descriptors(&self) -> Collection<StoredObjectDescriptor> {
        self.db.collection("document_descriptors")
    }

    pub fn profiles(&self) -> Collection<ProfileRecord> {
        self.db.collection("profiles")
    }
}
