pub mod admin_auth;
pub mod content;
pub mod metrics;
pub mod player;
pub mod sessions;
