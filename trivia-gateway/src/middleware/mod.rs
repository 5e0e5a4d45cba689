pub mod admin_session;
pub mod player;

pub use admin_session::{require_admin_session, AdminContext, SessionEnded};
pub use player::PlayerToken;
