use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use bytesize::ByteSize;
use clap::Args;
use object_store::local::LocalFileSystem;
use snafu::ResultExt;
use timber_chunk_store::ObjectStoreChunkStore;
use timber_ingester_core::{Ingester, IngesterOptions};
use timber_server_http::AdminServer;
use tokio_util::sync::CancellationToken;

use crate::error::{
    InvalidServerAddressSnafu, IoSnafu, ObjectStoreSnafu, OptionsSnafu, Result,
};

#[derive(Debug, Args)]
pub struct DevArgs {
    /// The address of the admin HTTP server.
    #[arg(long, default_value = "127.0.0.1:7780")]
    http_address: String,
    /// Directory chunks are stored under; a temporary directory if unset.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Number of flush queues and workers.
    #[arg(long, default_value_t = 16)]
    concurrent_flushes: usize,
    /// How often to sweep streams for flushable chunks.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    flush_check_period: Duration,
    /// Deadline for a single persistence operation.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    flush_op_timeout: Duration,
    /// Chunks with no appends for this long are flushed.
    #[arg(long, default_value = "30m", value_parser = humantime::parse_duration)]
    max_chunk_idle: Duration,
    /// Chunks spanning more than this are flushed.
    #[arg(long, default_value = "2h", value_parser = humantime::parse_duration)]
    max_chunk_age: Duration,
    /// How long flushed chunks stay in memory.
    #[arg(long, default_value = "15m", value_parser = humantime::parse_duration)]
    retain_period: Duration,
    /// Cut chunks on entries crossing this window. Zero disables sync cuts.
    #[arg(long, default_value = "0s", value_parser = humantime::parse_duration)]
    sync_period: Duration,
    /// Size at which a chunk block is sealed and compressed.
    #[arg(long, default_value = "256KiB", value_parser = parse_size)]
    block_size: ByteSize,
    /// Size at which the active chunk is cut.
    #[arg(long, default_value = "1.5MiB", value_parser = parse_size)]
    target_chunk_size: ByteSize,
    /// In-memory payload bytes above which WAL replay pauses.
    #[arg(long, default_value = "4GiB", value_parser = parse_size)]
    replay_memory_ceiling: ByteSize,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let http_address = self
            .http_address
            .parse::<SocketAddr>()
            .context(InvalidServerAddressSnafu {})?;

        println!("Starting Timber in development mode");

        let _ct_guard = ct.child_token().drop_guard();

        let mut temp_guard = None;
        let store_path = match self.data_dir.clone() {
            Some(dir) => {
                std::fs::create_dir_all(&dir).context(IoSnafu {})?;
                dir
            }
            None => {
                let temp = tempfile::tempdir().context(IoSnafu {})?;
                let path = temp.path().to_path_buf();
                temp_guard = Some(temp);
                path
            }
        };

        println!("Chunk store path: {}", store_path.display());
        println!("Admin server listening on {}", http_address);

        let object_store =
            LocalFileSystem::new_with_prefix(&store_path).context(ObjectStoreSnafu {})?;
        let chunk_store = Arc::new(ObjectStoreChunkStore::new(Arc::new(object_store)));

        let meter = timber_observability::meter("ingester");
        let ingester = Ingester::new(self.ingester_options(), chunk_store, &meter)
            .context(OptionsSnafu {})?;

        let admin_fut = run_admin_server(ingester.clone(), http_address, ct.clone());
        let ingester_fut = ingester.clone().run(ct);

        tokio::select! {
            res = admin_fut => {
                println!("Admin server exited with {:?}", res);
            }
            _ = ingester_fut => {
                println!("Ingester exited");
            }
        }

        drop(temp_guard);
        Ok(())
    }

    fn ingester_options(&self) -> IngesterOptions {
        IngesterOptions {
            concurrent_flushes: self.concurrent_flushes,
            flush_check_period: self.flush_check_period,
            flush_op_timeout: self.flush_op_timeout,
            max_chunk_idle: self.max_chunk_idle,
            max_chunk_age: self.max_chunk_age,
            retain_period: self.retain_period,
            sync_period: self.sync_period,
            block_size: self.block_size.0 as usize,
            target_chunk_size: self.target_chunk_size.0 as usize,
            replay_memory_ceiling: self.replay_memory_ceiling.0 as usize,
            ..Default::default()
        }
    }
}

fn parse_size(value: &str) -> std::result::Result<ByteSize, String> {
    value.parse()
}

async fn run_admin_server(
    ingester: Arc<Ingester>,
    address: SocketAddr,
    ct: CancellationToken,
) -> Result<()> {
    let app = AdminServer::new(ingester).into_router();

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .context(IoSnafu {})?;

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        ct.cancelled().await;
    });

    server.await.context(IoSnafu {})
}
