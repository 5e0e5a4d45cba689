pub mod client_meta;
pub mod cookies;
pub mod validation;

pub use client_meta::ClientMeta;
pub use cookies::CookiePolicy;
pub use validation::ValidatedJson;
