pub mod cms;
pub mod security_event;
pub mod session;

pub use cms::{CmsAuthResponse, CmsUser, TokenPair};
pub use security_event::{SecurityEvent, SecurityEventType, Severity};
pub use session::{ClientInfo, InvalidReason, Session, SessionStats, SessionValidation};
