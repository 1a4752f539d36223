//! Credentials and token lifecycle.

mod credentials;
mod store;

pub use credentials::{Credentials, DEFAULT_TOKEN_TTL_SECS, EXPIRY_MARGIN_SECS, Endpoint};
pub use store::CredentialStore;
