//! Skycloud Processing Library
//!
//! Everything between a raw upload request and a stored object: header directive
//! parsing, chunk reassembly, name generation, image compression and thumbnail
//! rendering.

#[cfg(feature = "image")]
pub mod compression;
pub mod naming;
pub mod thumbnail;
pub mod upload;

#[cfg(feature = "image")]
pub use compression::compress_image;
pub use naming::{thumbnail_key, NameGenerator};
pub use thumbnail::{MediaThumbnailer, ThumbnailGenerator};
pub use upload::{
    parse_upload_headers, AssembledUpload, ChunkOutcome, ChunkReassembler, FinalizedUpload,
    HeaderError,
};
