mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dtp_api::auth::{self, AppState, AppStateInner, JwtSettings};
use dtp_api::photos::{DiskPhotoStore, ImageKitStore, PhotoStore};
use dtp_api::rate_limit::RateLimiter;
use dtp_db::seed::{DEFAULT_HOSPITALS, seed_hospitals};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dtp_server=debug,dtp_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = dtp_db::Database::open(&config.db_path)?;

    if config.init_hospitals {
        let inserted = seed_hospitals(&db, DEFAULT_HOSPITALS)?;
        if inserted > 0 {
            info!("Initialized {} hospitals", inserted);
        }
    }
    if let Some(admin) = &config.seed_admin {
        auth::ensure_state_admin(&db, &admin.name, &admin.email, &admin.password)?;
    }

    // ImageKit when configured, local disk otherwise
    let mut upload_dir = None;
    let photos: Arc<dyn PhotoStore> = match &config.imagekit {
        Some(imagekit) => {
            info!("Photo storage: ImageKit folder {}", imagekit.folder);
            Arc::new(ImageKitStore::new(imagekit.private_key.clone(), imagekit.folder.clone()))
        }
        None => {
            let store = DiskPhotoStore::new(config.upload_dir.clone(), config.public_url.clone()).await?;
            upload_dir = Some(store.dir().to_path_buf());
            Arc::new(store)
        }
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt: JwtSettings {
            secret: config.jwt_secret.clone(),
            ttl: config.jwt_ttl,
        },
        photos,
        expose_internal_errors: !config.production,
    });

    let limiter = config.rate_limit.map(|(max, window)| {
        info!("Rate limit: {} requests per {}s per client", max, window.as_secs());
        Arc::new(RateLimiter::new(max, window))
    });
    if limiter.is_none() {
        warn!("Rate limiting disabled");
    }

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.cors_origin)?)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let mut app = dtp_api::app(state, limiter);
    if let Some(dir) = upload_dir {
        app = app.nest_service("/uploads", ServeDir::new(dir));
    }
    let app = dtp_api::security::harden(app)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "DTP server listening on {} ({})",
        addr,
        if config.production { "production" } else { "development" }
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
