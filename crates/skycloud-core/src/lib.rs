//! Skycloud Core Library
//!
//! This crate provides the domain models, error types, configuration and duration
//! parsing shared by every Skycloud component.

pub mod config;
pub mod duration;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    BaseConfig, ChunkConfig, Config, FilesConfig, SkycloudConfig, StorageConfig, TasksConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
