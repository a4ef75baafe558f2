pub mod clock;
pub mod database;
pub mod descriptor_store;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod otp_sender;
pub mod profile_store;
pub mod registry;
pub mod session;
pub mod session_store;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use database::MongoDb;
pub use descriptor_store::{DescriptorStore, MemoryDescriptorStore, MongoDescriptorStore};
pub use dispatcher::{FilePart, ProfileUpdateDispatcher, ProfileUpdateRequest};
pub use error::ServiceError;
pub use health::{StorageHealth, StorageProbe};
pub use metrics::{get_metrics, init_metrics};
pub use otp_sender::{LogOtpSender, OtpSender, RecordingOtpSender};
pub use profile_store::{MemoryProfileStore, MongoProfileStore, ProfileStore};
pub use registry::DocumentRegistry;
pub use session::SessionGuard;
pub use session_store::{MemorySessionStore, RedisSessionStore, SessionStore};
pub use storage::{BucketStorage, RetryPolicy, Storage, StorageError, UrlSigner};
