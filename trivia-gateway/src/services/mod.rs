pub mod cms_client;
pub mod error;
pub mod question_upload;
pub mod session_store;
pub mod session_tracker;
pub mod token_relay;

pub use cms_client::{CmsClient, CmsResponse};
pub use error::GatewayError;
pub use question_upload::{QuestionUploader, UploadReport};
pub use session_store::{InMemorySessionStore, SessionStore};
pub use session_tracker::{spawn_expiry_sweeper, SessionTracker};
pub use token_relay::{RelayOutcome, TokenRelay};
