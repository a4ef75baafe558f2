use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const IMAGE_OR_PDF_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "application/pdf"];

/// Logical role of a document within one owner's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSlot {
    Photo,
    Cv,
    BarRegistrationCertificate,
}

impl DocumentSlot {
    pub const ALL: [DocumentSlot; 3] = [
        DocumentSlot::Photo,
        DocumentSlot::Cv,
        DocumentSlot::BarRegistrationCertificate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSlot::Photo => "photo",
            DocumentSlot::Cv => "cv",
            DocumentSlot::BarRegistrationCertificate => "bar_registration_certificate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        DocumentSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == value)
    }

    pub fn allowed_content_types(&self) -> &'static [&'static str] {
        match self {
            DocumentSlot::Photo => IMAGE_TYPES,
            DocumentSlot::Cv | DocumentSlot::BarRegistrationCertificate => IMAGE_OR_PDF_TYPES,
        }
    }

    /// Returns the canonical content type if this slot accepts it.
    ///
    /// Parameters (`; charset=...`) and case are ignored.
    pub fn accept(&self, content_type: &str) -> Option<&'static str> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let essence = if essence == "image/jpg" {
            "image/jpeg".to_string()
        } else {
            essence
        };
        self.allowed_content_types()
            .iter()
            .copied()
            .find(|allowed| *allowed == essence)
    }
}

impl fmt::Display for DocumentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentSlot::parse(s).ok_or_else(|| format!("Unknown document slot: {}", s))
    }
}

/// Metadata for the single stored object currently occupying an owner's slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObjectDescriptor {
    pub owner_id: String,
    pub slot: DocumentSlot,
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl StoredObjectDescriptor {
    /// Storage key layout: `{owner_id}/{slot}/{object_id}`.
    pub fn object_key(owner_id: &str, slot: DocumentSlot, object_id: &str) -> String {
        format!("{}/{}/{}", owner_id, slot.as_str(), object_id)
    }

    /// Suggested download file name, e.g. `cv.pdf`.
    pub fn file_name(&self) -> String {
        let extension = match self.content_type.as_str() {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "application/pdf" => "pdf",
            _ => "bin",
        };
        format!("{}.{}", self.slot.as_str(), extension)
    }
}

/// Split a storage key back into its owner and slot.
pub fn parse_object_key(key: &str) -> Option<(&str, DocumentSlot)> {
    let mut parts = key.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let slot = DocumentSlot::parse(parts.next()?)?;
    parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
    Some((owner, slot))
}
