pub mod signature_store;

pub use signature_store::{validate_username, SignatureStore};
