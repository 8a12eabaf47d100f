use ragline::config::PipelineConfig;
use ragline::embedding::HttpEmbeddingClient;
use ragline::object_store::S3ObjectStore;
use ragline::pipeline::IngestionService;
use ragline::store::BackendRegistry;
use ragline::{api, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    logging::init_tracing();

    let config = PipelineConfig::load().expect("Failed to load pipeline configuration");
    let registry = BackendRegistry::with_defaults();
    let objects = Arc::new(
        S3ObjectStore::from_env(&config.region, &config.object_store)
            .expect("Failed to build object store client"),
    );
    let embedding_client = Box::new(HttpEmbeddingClient::from_settings(&config.embedding));
    let service = IngestionService::from_config(&config, &registry, objects, embedding_client)
        .expect("Failed to assemble ingestion pipeline");
    service
        .ensure_backend_ready()
        .await
        .expect("Failed to provision the vector store backend");

    let app = api::create_router(Arc::new(service));
    let (listener, port) = bind_listener(config.server_port)
        .await
        .expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener(configured_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8700..=8799;
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
        "No available port found in range 8700-8799",
    ))
}
