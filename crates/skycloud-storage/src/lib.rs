//! Skycloud Storage Library
//!
//! This crate provides the storage abstraction used by the upload engine and its
//! lifecycle tasks, with implementations for the local filesystem and S3-compatible
//! object stores.
//!
//! # Storage key format
//!
//! Callers pass bare keys (`aB3xYz.png`, `.thumbnail.<id>.jpg`). Every backend
//! qualifies them with the configured subdirectory before touching the medium, so the
//! same key always resolves to the same object regardless of the operation.
//!
//! Keys must not contain `..`, a backslash or a leading `/`.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_storage, verify_access};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use skycloud_core::StorageBackend;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
