pub mod auth;
pub mod documents;

pub use auth::{
    CsrfTokenResponse, MessageResponse, ProfileSummary, RequestOtpRequest, RequestOtpResponse,
    VerifyOtpRequest, VerifyOtpResponse,
};
pub use documents::{DescriptorResponse, DownloadParams, MetadataResponse, ProfileResponse, UrlsResponse};
