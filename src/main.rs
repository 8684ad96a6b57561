use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use vector_records::{
    api, config, embedding, logging,
    metadata::PgMetadataStore,
    qdrant::QdrantService,
    queue::RedisTaskQueue,
    records::RecordService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("vector-records");
    let config = config::init_config().context("Failed to load configuration")?;

    let metadata_store = PgMetadataStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the metadata database")?;
    metadata_store
        .ensure_schema()
        .await
        .context("Failed to ensure metadata schema")?;
    let task_queue = RedisTaskQueue::connect(&config.redis_url, config.process_file_queue.clone())
        .await
        .context("Failed to connect to Redis")?;
    let vector_store = QdrantService::new(&config.qdrant_url, config.qdrant_api_key.clone())
        .context("Failed to build Qdrant client")?;
    let embedding_client =
        embedding::build_embedding_client(config).context("Failed to build embedding client")?;

    let service = RecordService::new(
        embedding_client,
        Arc::new(vector_store),
        Arc::new(metadata_store),
        Arc::new(task_queue),
        reqwest::Client::new(),
    );
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener().await.context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config::get_config().and_then(|config| config.server_port) {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
