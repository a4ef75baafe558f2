pub mod document;
pub mod profile;
pub mod session;

pub use document::{parse_object_key, DocumentSlot, StoredObjectDescriptor};
pub use profile::{FeeStructure, ProfileFields, ProfileFieldsInput, ProfileRecord};
pub use session::{OtpCheck, OtpRecord, OtpTicket, Role, Session};
