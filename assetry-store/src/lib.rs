extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod credentials;
pub mod opendal_storage;
pub mod storage_builder;

// Re-export commonly used items
pub use config::StorageConfig;
pub use credentials::{CredentialField, EnvCredentials};
pub use opendal_storage::OpenDalStorage;
pub use storage_builder::{build_context, create_storage, StorageBuilder};
