//! Turns either request shape into one profile update.
//!
//! Files are staged in the registry first, then the profile record is
//! written, then the staged documents become current. A failure at any step
//! undoes the steps before it, so callers see all of the update or none of it.

use crate::models::{DocumentSlot, ProfileFields, ProfileFieldsInput, ProfileRecord};
use crate::services::clock::Clock;
use crate::services::error::ServiceError;
use crate::services::profile_store::ProfileStore;
use crate::services::registry::DocumentRegistry;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{Instrument, Span};

/// A recognised file part of a multipart update.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub slot: DocumentSlot,
    pub content_type: String,
    pub bytes: Bytes,
    pub file_name: Option<String>,
}

/// Request shape, resolved once at the HTTP boundary.
#[derive(Debug, Clone)]
pub enum ProfileUpdateRequest {
    Json(ProfileFieldsInput),
    Multipart {
        fields: ProfileFieldsInput,
        files: Vec<FilePart>,
    },
}

#[derive(Clone)]
pub struct ProfileUpdateDispatcher {
    registry: DocumentRegistry,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileUpdateDispatcher {
    pub fn new(
        registry: DocumentRegistry,
        profiles: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            profiles,
            clock,
        }
    }

    #[tracing::instrument(skip(self, request), fields(owner_id = %owner_id))]
    pub async fn update_profile(
        &self,
        owner_id: &str,
        request: ProfileUpdateRequest,
    ) -> Result<ProfileRecord, ServiceError> {
        let (input, files) = match request {
            ProfileUpdateRequest::Json(input) => (input, Vec::new()),
            ProfileUpdateRequest::Multipart { fields, files } => (fields, files),
        };

        let fields = input.validate_fields()?;
        for file in &files {
            self.registry
                .validate(file.slot, &file.content_type, file.bytes.len())?;
        }

        let this = self.clone();
        let owner_id = owner_id.to_string();
        tokio::spawn(
            async move { this.apply(&owner_id, fields, files).await }.instrument(Span::current()),
        )
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("profile update task failed: {}", e)))?
    }

    async fn apply(
        &self,
        owner_id: &str,
        fields: ProfileFields,
        files: Vec<FilePart>,
    ) -> Result<ProfileRecord, ServiceError> {
        if files.is_empty() {
            let previous = self
                .profiles
                .get(owner_id)
                .await
                .map_err(ServiceError::Persistence)?;
            let record = self.build_record(owner_id, previous.as_ref(), fields, BTreeSet::new());
            self.profiles
                .put(record.clone())
                .await
                .map_err(ServiceError::Persistence)?;
            tracing::info!("Profile fields updated");
            return Ok(record);
        }

        let slots: Vec<DocumentSlot> = files.iter().map(|f| f.slot).collect();
        let mut batch = self.registry.begin(owner_id, &slots).await;

        for file in files {
            let staged = batch
                .stage(file.slot, file.bytes, &file.content_type)
                .await
                .map(|_| ());
            if let Err(e) = staged {
                tracing::warn!(slot = %file.slot, error = %e, "File upload failed, rejecting update");
                batch.abort().await;
                return Err(e);
            }
        }

        let previous = match self.profiles.get(owner_id).await {
            Ok(previous) => previous,
            Err(e) => {
                batch.abort().await;
                return Err(ServiceError::Persistence(e));
            }
        };

        let uploaded: BTreeSet<DocumentSlot> = slots.into_iter().collect();
        let record = self.build_record(owner_id, previous.as_ref(), fields, uploaded);

        if let Err(e) = self.profiles.put(record.clone()).await {
            batch.abort().await;
            return Err(ServiceError::Persistence(e));
        }

        let committed = match batch.commit().await {
            Ok(committed) => committed,
            Err(e) => {
                if let Err(restore_err) = self.profiles.restore(owner_id, previous).await {
                    tracing::error!(error = %restore_err, "Failed to restore profile after document commit failure");
                }
                return Err(e);
            }
        };
        let stored = committed.finish().await;

        tracing::info!(documents = stored.len(), "Profile updated with documents");
        Ok(record)
    }

    fn build_record(
        &self,
        owner_id: &str,
        previous: Option<&ProfileRecord>,
        fields: ProfileFields,
        uploaded: BTreeSet<DocumentSlot>,
    ) -> ProfileRecord {
        let now = self.clock.now();
        let mut documents = previous.map(|p| p.documents.clone()).unwrap_or_default();
        documents.extend(uploaded);

        ProfileRecord {
            owner_id: owner_id.to_string(),
            fields,
            documents,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    /// The stored profile, with `documents` read from the registry so it
    /// always names exactly the populated slots.
    pub async fn get_profile(&self, owner_id: &str) -> Result<ProfileRecord, ServiceError> {
        let mut record = self
            .profiles
            .get(owner_id)
            .await
            .map_err(ServiceError::Persistence)?
            .ok_or(ServiceError::ProfileNotFound)?;
        record.documents = self.registry.get_metadata(owner_id).await?.into_keys().collect();
        Ok(record)
    }

    /// Delete a document and drop its reference from the profile.
    pub async fn remove_document(
        &self,
        owner_id: &str,
        slot: DocumentSlot,
    ) -> Result<(), ServiceError> {
        self.registry.delete(owner_id, slot).await?;

        let cleared = match self.profiles.get(owner_id).await {
            Ok(Some(mut record)) => {
                if record.documents.remove(&slot) {
                    record.updated_at = self.clock.now();
                    self.profiles.put(record).await.map(|_| ())
                } else {
                    Ok(())
                }
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = cleared {
            tracing::warn!(owner_id = %owner_id, slot = %slot, error = %e, "Profile document reference not cleared");
        }
        Ok(())
    }
}
