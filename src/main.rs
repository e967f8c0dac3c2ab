use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use feedpost::config::AppConfig;
use feedpost::feedback::{HttpNotifier, NoopNotifier, Notifier};
use feedpost::openapi::ApiDoc;
use feedpost::repo::Store;
use feedpost::{config, AppState, PostService, TxCoordinator};

#[cfg(feature = "postgres-store")]
async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    use feedpost::repo::pg::PgStore;
    use sqlx::postgres::PgPoolOptions;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.pool.max_connections)
        .min_connections(cfg.pool.min_connections)
        .idle_timeout(cfg.pool.idle_timeout)
        .max_lifetime(cfg.pool.max_lifetime)
        .connect(&cfg.database_url)
        .await
        .context("connecting to postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(PgStore::new(pool)))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_store(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    warn!("Using in-memory repository backend; data is lost on restart");
    Ok(Arc::new(feedpost::repo::inmem::InMemStore::new()))
}

fn build_notifier(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &cfg.recommender {
        Some(rec) => {
            info!(url = %rec.base_url, "Recommender configured");
            let client = HttpNotifier::new(&rec.base_url, rec.api_key.clone(), rec.timeout)?;
            Ok(Arc::new(client))
        }
        None => {
            warn!("RECOMMENDER_URL not set; feedback and item updates are dropped");
            Ok(Arc::new(NoopNotifier))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping feedpost server");

    let cfg = AppConfig::from_env().context("loading configuration")?;
    let verifier = web::Data::new(cfg.token_key.verifier()?);
    let store = build_store(&cfg).await?;
    let notifier = build_notifier(&cfg)?;
    let state = web::Data::new(AppState {
        posts: PostService::new(TxCoordinator::new(store), notifier),
    });

    let openapi = ApiDoc::openapi();
    info!("OpenAPI document generated");

    let port = cfg.port;
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .app_data(verifier.clone())
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(("0.0.0.0", port))?;

    info!("Listening on http://0.0.0.0:{port}");

    server.run().await?;
    Ok(())
}
