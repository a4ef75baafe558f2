use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use validator::Validate;

use crate::models::DocumentSlot;
use crate::services::error::ServiceError;
use crate::services::session::normalize_phone;

const MAX_LIST_ITEMS: usize = 20;
const MAX_LIST_ITEM_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStructure {
    Hourly,
    Fixed,
    PerHearing,
    Free,
}

impl FromStr for FeeStructure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(FeeStructure::Hourly),
            "fixed" => Ok(FeeStructure::Fixed),
            "per_hearing" => Ok(FeeStructure::PerHearing),
            "free" => Ok(FeeStructure::Free),
            other => Err(format!("unknown fee structure '{}'", other)),
        }
    }
}

/// Business fields as submitted, before validation.
///
/// Both request shapes (JSON body and multipart text parts) are decoded into
/// this type and then go through [`ProfileFieldsInput::validate_fields`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
pub struct ProfileFieldsInput {
    #[validate(length(min = 2, max = 120, message = "must be between 2 and 120 characters"))]
    pub full_name: Option<String>,
    #[validate(length(min = 3, max = 40, message = "must be between 3 and 40 characters"))]
    pub bar_number: Option<String>,
    #[validate(length(min = 2, max = 80, message = "must be between 2 and 80 characters"))]
    pub city: Option<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    #[validate(range(max = 70, message = "must be at most 70"))]
    pub experience_years: Option<u32>,
    pub consultation_fee: Option<u32>,
    pub fee_structure: Option<FeeStructure>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub bio: Option<String>,
    pub phone: Option<String>,
}

impl ProfileFieldsInput {
    /// Build the input from multipart text parts.
    ///
    /// List fields accept repeated parts (`languages=en&languages=hi`) or a
    /// comma separated value. Unknown names are ignored.
    pub fn from_form<I>(pairs: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut input = ProfileFieldsInput::default();

        for (name, value) in pairs {
            let name = name.trim_end_matches("[]");
            match name {
                "full_name" => input.full_name = Some(value),
                "bar_number" => input.bar_number = Some(value),
                "city" => input.city = Some(value),
                "bio" => input.bio = Some(value),
                "phone" => input.phone = Some(value),
                "specializations" => input.specializations.extend(split_list(&value)),
                "languages" => input.languages.extend(split_list(&value)),
                "experience_years" => {
                    input.experience_years = parse_optional_number(name, &value)?;
                }
                "consultation_fee" => {
                    input.consultation_fee = parse_optional_number(name, &value)?;
                }
                "fee_structure" => {
                    input.fee_structure = if value.trim().is_empty() {
                        None
                    } else {
                        Some(value.parse().map_err(|e: String| ServiceError::Validation {
                            field: name.to_string(),
                            message: e,
                        })?)
                    };
                }
                _ => {}
            }
        }

        Ok(input)
    }

    /// The single validation routine for profile fields.
    pub fn validate_fields(self) -> Result<ProfileFields, ServiceError> {
        let full_name = required("full_name", self.full_name.as_deref())?;
        let bar_number = required("bar_number", self.bar_number.as_deref())?;
        let city = required("city", self.city.as_deref())?;

        let trimmed = ProfileFieldsInput {
            full_name: Some(full_name.clone()),
            bar_number: Some(bar_number.clone()),
            city: Some(city.clone()),
            bio: optional_trimmed(self.bio.as_deref()),
            ..self.clone()
        };
        trimmed.validate().map_err(first_field_error)?;

        let specializations = normalize_list("specializations", &self.specializations)?;
        let languages = normalize_list("languages", &self.languages)?;

        let phone = match optional_trimmed(self.phone.as_deref()) {
            Some(raw) => Some(normalize_phone(&raw).ok_or_else(|| ServiceError::Validation {
                field: "phone".to_string(),
                message: "must be an E.164 phone number".to_string(),
            })?),
            None => None,
        };

        Ok(ProfileFields {
            full_name,
            bar_number: bar_number.to_ascii_uppercase(),
            city,
            specializations,
            experience_years: self.experience_years,
            consultation_fee: self.consultation_fee,
            fee_structure: self.fee_structure,
            languages,
            bio: trimmed.bio,
            phone,
        })
    }
}

/// Validated business fields of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
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
}

/// Persisted profile: business fields plus the slots that hold a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub owner_id: String,
    #[serde(flatten)]
    pub fields: ProfileFields,
    #[serde(default)]
    pub documents: BTreeSet<DocumentSlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn required(field: &str, value: Option<&str>) -> Result<String, ServiceError> {
    optional_trimmed(value).ok_or_else(|| ServiceError::Validation {
        field: field.to_string(),
        message: "is required".to_string(),
    })
}

fn optional_trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn normalize_list(field: &str, values: &[String]) -> Result<Vec<String>, ServiceError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if value.chars().count() > MAX_LIST_ITEM_LEN {
            return Err(ServiceError::Validation {
                field: field.to_string(),
                message: format!("entries must be at most {} characters", MAX_LIST_ITEM_LEN),
            });
        }
        if seen.insert(value.to_lowercase()) {
            out.push(value.to_string());
        }
    }
    if out.len() > MAX_LIST_ITEMS {
        return Err(ServiceError::Validation {
            field: field.to_string(),
            message: format!("at most {} entries allowed", MAX_LIST_ITEMS),
        });
    }
    Ok(out)
}

fn parse_optional_number(field: &str, value: &str) -> Result<Option<u32>, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ServiceError::Validation {
            field: field.to_string(),
            message: "must be a non-negative whole number".to_string(),
        })
}

fn first_field_error(errors: validator::ValidationErrors) -> ServiceError {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    match fields.first() {
        Some((field, errs)) => ServiceError::Validation {
            field: field.to_string(),
            message: errs
                .first()
                .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                .unwrap_or_else(|| "is invalid".to_string()),
        },
        None => ServiceError::Validation {
            field: "profile".to_string(),
            message: errors.to_string(),
        },
    }
}
