//! Listwise API server

use std::sync::Arc;

use anyhow::Context;
use listwise_api::{create_router, AppState, Config};
use listwise_billing::{BillingGateway, OfflineGateway, StripeClient, StripeGateway};
use listwise_shared::{create_pool, run_migrations, Datastore};
use tokio::signal;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("listwise_api=info,listwise_billing=info,tower_http=info")
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Datastore> {
    match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database initialized successfully");
            Ok(Datastore::postgres(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            Ok(Datastore::in_memory())
        }
    }
}

/// Billing gateway plus the secret webhooks are signed with
fn open_gateway(config: &Config) -> anyhow::Result<(Arc<dyn BillingGateway>, String)> {
    if config.enable_billing {
        let stripe = StripeClient::from_env().context("Invalid Stripe configuration")?;
        let secret = stripe.config().webhook_secret.clone();
        tracing::info!("Billing enabled via Stripe");
        return Ok((Arc::new(StripeGateway::new(stripe)), secret));
    }

    let secret = config.billing_webhook_secret.clone().unwrap_or_default();
    if secret.is_empty() {
        tracing::warn!("Billing disabled and BILLING_WEBHOOK_SECRET unset; webhooks will be refused");
    }
    tracing::warn!("Billing disabled; using the offline gateway");
    Ok((Arc::new(OfflineGateway::new()), secret))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        billing_enabled = config.enable_billing,
        admins = config.admin_user_ids.len(),
        "Starting Listwise API"
    );

    let store = open_store(&config).await?;
    let (gateway, webhook_secret) = open_gateway(&config)?;
    let bind_address = config.bind_address.clone();

    let state = AppState::new(config, store, gateway, webhook_secret).map_err(|e| {
        tracing::error!(error = %e, "Plan catalog failed validation");
        anyhow::anyhow!(e)
    })?;

    let app = create_router(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
