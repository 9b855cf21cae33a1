//! Persistence for stored files and usage metrics.
//!
//! The upload engine and the lifecycle tasks only talk to [`FileRepository`]. Two
//! implementations are provided: [`PgFileRepository`] backed by PostgreSQL and
//! [`InMemoryFileRepository`] used when no database is configured and in tests.

pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::InMemoryFileRepository;
pub use postgres::PgFileRepository;
pub use repository::FileRepository;
