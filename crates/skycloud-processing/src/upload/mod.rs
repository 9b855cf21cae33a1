//! Upload ingestion: header directives and resumable chunk reassembly.

pub mod chunks;
pub mod directive;

pub use chunks::{AssembledUpload, ChunkOutcome, ChunkReassembler, FinalizedUpload};
pub use directive::{parse_upload_headers, parse_upload_headers_at, HeaderError};
