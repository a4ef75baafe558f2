use crate::models::{DocumentSlot, FeeStructure, ProfileRecord, StoredObjectDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct DescriptorResponse {
    pub owner_id: String,
    pub slot: DocumentSlot,
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub content_hash: String,
    pub created_at: String,
}

impl From<StoredObjectDescriptor> for DescriptorResponse {
    fn from(d: StoredObjectDescriptor) -> Self {
        Self {
            owner_id: d.owner_id,
            slot: d.slot,
            key: d.key,
            content_type: d.content_type,
            size: d.size,
            content_hash: d.content_hash,
            created_at: d.created_at.to_rfc3339(),
        }
    }
}

pub type MetadataResponse = BTreeMap<DocumentSlot, DescriptorResponse>;
pub type UrlsResponse = BTreeMap<DocumentSlot, String>;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub owner_id: String,
    pub full_name: String,
    pub bar_number: String,
    pub city: String,
    pub specializations: Vec<String>,
    pub experience_years: Option<u32>,
    pub consultation_fee: Option<u32>,
    pub fee_structure: Option<FeeStructure>,
    pub languages: Vec<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub documents: Vec<DocumentSlot>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ProfileRecord> for ProfileResponse {
    fn from(record: ProfileRecord) -> Self {
        let fields = record.fields;
        Self {
            owner_id: record.owner_id,
            full_name: fields.full_name,
            bar_number: fields.bar_number,
            city: fields.city,
            specializations: fields.specializations,
            experience_years: fields.experience_years,
            consultation_fee: fields.consultation_fee,
            fee_structure: fields.fee_structure,
            languages: fields.languages,
            bio: fields.bio,
            phone: fields.phone,
            documents: record.documents.into_iter().collect(),
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}
