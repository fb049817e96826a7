use actix_web::{web, App, HttpServer};
use chat_sync_service::{
    config::{Config, StoreBackend},
    error::AppError,
    fanout::{LocalTransport, RedisRelay, RedisTransport, Transport},
    logging, migrations, routes,
    state::AppState,
    store::{ChatStore, MemoryStore, PostgresStore},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let cfg = Config::from_env()?;

    let store: Arc<dyn ChatStore> = match cfg.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;
            let store = PostgresStore::connect(url, cfg.db_max_connections, cfg.db_connect_timeout)
                .await
                .map_err(|e| AppError::StartServer(format!("database: {e}")))?;
            migrations::run_all(store.pool())
                .await
                .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;
            Arc::new(store)
        }
    };

    // Client event streams always subscribe to this node's registry
    let hub = LocalTransport::new();
    let transport: Arc<dyn Transport> = match cfg.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisTransport::from_url(url)
                .await
                .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
            RedisRelay::from_url(url, hub.clone())
                .map_err(|e| AppError::StartServer(format!("redis relay: {e}")))?
                .spawn();
            tracing::info!("fan-out over redis");
            Arc::new(redis)
        }
        None => {
            tracing::info!("fan-out in-process");
            Arc::new(hub.clone())
        }
    };

    let port = cfg.port;
    let state = AppState::new(cfg, store, transport, Arc::new(hub));
    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!(%bind_addr, "starting chat-sync-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(e.to_string()))
}
