pub mod auth;
pub mod files;
pub mod health;
pub mod profile;

pub use auth::{csrf_token, logout, request_otp, rotate_csrf_token, verify_otp};
pub use files::{delete_file, download_file, file_metadata, file_urls};
pub use health::{health_check, metrics, storage_health};
pub use profile::{get_profile, update_profile};
