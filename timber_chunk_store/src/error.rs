use std::sync::Arc;

use snafu::Snafu;

/// Chunk store error types.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ChunkStoreError {
    /// The backing store rejected or failed the write.
    #[snafu(display("object store error: {message}"))]
    ObjectStore {
        message: &'static str,
        #[snafu(source(from(object_store::Error, Arc::new)))]
        source: Arc<object_store::Error>,
    },
    /// The store is temporarily unavailable.
    #[snafu(display("chunk store unavailable: {message}"))]
    Unavailable { message: String },
}

pub type Result<T, E = ChunkStoreError> = std::result::Result<T, E>;
