//! Shared application state.

use skycloud_core::Config;
use skycloud_db::FileRepository;
use skycloud_processing::{ChunkReassembler, NameGenerator};
use skycloud_storage::Storage;
use std::sync::Arc;

/// Everything handlers need. Shared as `Arc<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub repository: Arc<dyn FileRepository>,
    pub reassembler: Arc<ChunkReassembler>,
    pub names: NameGenerator,
}

impl AppState {
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        repository: Arc<dyn FileRepository>,
        reassembler: Arc<ChunkReassembler>,
    ) -> Self {
        let names = NameGenerator::new(config.files());
        Self {
            config,
            storage,
            repository,
            reassembler,
            names,
        }
    }
}
