use mimalloc::MiMalloc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use xrally::api::x_api::XApiClient;
use xrally::config::{BROADCAST_DELAY_KEY, Config};
use xrally::db::Database;
use xrally::router::{RallyState, cookie_key, rally_router};
use xrally::service::orchestrator::{self, OrchestratorArgs};
use xrally::service::{EventBroadcaster, FixedPacing, SweepRunner};
use xrally::x_oauth::{TokenRefresher, XOauthEndpoints};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.listen_addr,
        base_url = %cfg.base_url,
        database_url = %cfg.database_url,
        proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
    );

    let db = Database::connect(&cfg.database_url).await?;
    db.settings
        .ensure_default(
            BROADCAST_DELAY_KEY,
            &cfg.broadcast.default_delay_secs.to_string(),
        )
        .await?;

    let mut http = reqwest::Client::builder()
        .user_agent(concat!("xrally/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(cfg.http.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.http.timeout_secs))
        // The token endpoint must not be followed across redirects.
        .redirect(reqwest::redirect::Policy::none());
    if let Some(proxy) = cfg.proxy.as_ref() {
        http = http.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    let http = http.build()?;

    let oauth = Arc::new(XOauthEndpoints::new(
        &cfg.x,
        &cfg.redirect_uri()?,
        http.clone(),
    )?);
    let actions = Arc::new(XApiClient::new(
        http,
        &cfg.x.api_base,
        cfg.broadcast.actions_per_minute,
    ));
    let events = EventBroadcaster::new(cfg.broadcast.event_capacity);
    let refresher = TokenRefresher::new(
        oauth.clone(),
        db.accounts.clone(),
        db.audit.clone(),
        events.clone(),
    );
    let runner = SweepRunner::new(
        db.accounts.clone(),
        db.audit.clone(),
        events.clone(),
        refresher,
        actions,
        Arc::new(FixedPacing::new(cfg.step_delay())),
    );
    let handle = orchestrator::spawn(OrchestratorArgs {
        runner: Arc::new(runner),
        settings: db.settings.clone(),
        events: events.clone(),
        default_delay_secs: cfg.broadcast.default_delay_secs,
    })
    .await?;

    let state = RallyState::new(
        handle,
        events,
        db,
        oauth,
        cookie_key(&cfg.session_secret),
        cfg.secure_cookie,
    );
    let app = rally_router(state);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
