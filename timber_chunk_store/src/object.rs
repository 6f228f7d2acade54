use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path};
use snafu::ResultExt;
use tracing::debug;

use crate::{ChunkStore, Result, WireChunk, error::ObjectStoreSnafu};

/// Chunk store backed by an [`object_store::ObjectStore`].
///
/// Each chunk is written with `PutMode::Create` under its identity key; an
/// `AlreadyExists` response means an earlier attempt for the same chunk made
/// it through, so it is treated as success.
pub struct ObjectStoreChunkStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreChunkStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn put_chunk(&self, chunk: WireChunk) -> Result<()> {
        let path: Path = chunk.key().into();

        let result = self
            .store
            .put_opts(
                &path,
                PutPayload::from_bytes(chunk.data),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                debug!(key = %path, "chunk already stored, skipping");
                Ok(())
            }
            Err(err) => Err(err).context(ObjectStoreSnafu {
                message: "failed to upload chunk",
            }),
        }
    }
}

#[async_trait]
impl ChunkStore for ObjectStoreChunkStore {
    async fn put(&self, chunks: Vec<WireChunk>) -> Result<()> {
        try_join_all(chunks.into_iter().map(|chunk| self.put_chunk(chunk))).await?;
        Ok(())
    }
}
