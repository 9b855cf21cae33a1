//! Domain models shared across the ingestion path, persistence and background tasks.

pub mod file;
pub mod metric;
pub mod upload;

pub use file::{FileRecord, NewFileRecord, MAX_THUMBNAIL_ATTEMPTS};
pub use metric::{MetricSnapshot, UsageStats};
pub use upload::{FileNameFormat, PartialDescriptor, UploadOptions, UploadOverrides};
