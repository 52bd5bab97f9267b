use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use landing_leads_api::cache::create_cache;
use landing_leads_api::clock::{Clock, SystemClock};
use landing_leads_api::cms::{provider_from_config, CmsClient};
use landing_leads_api::config::Config;
use landing_leads_api::db::Database;
use landing_leads_api::docs::ApiDoc;
use landing_leads_api::email_client::{DisabledEmail, EmailDispatcher, ResendEmailClient};
use landing_leads_api::handlers::{self, AppState, Integrations};
use landing_leads_api::identity_client::{IdentityStore, NoIdentityStore, SupabaseIdentityClient};
use landing_leads_api::lead_capture::LeadCaptureService;
use landing_leads_api::lead_repository::{LeadRepository, PgLeadStore};
use landing_leads_api::rate_limit::RateLimiter;
use landing_leads_api::token::TokenIssuer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "landing_leads_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // CMS content: cache backend, provider, optional background warm-up
    let cache = create_cache(
        config.redis_url.as_deref(),
        config.cms_memory_cache_max_entries,
        clock.clone(),
    )
    .await;
    let provider = provider_from_config(&config)?;
    let cms = Arc::new(CmsClient::new(
        provider,
        cache,
        config.cms_cache_ttl,
        clock.clone(),
    ));
    if let Some(interval) = config.cms_warmup_interval {
        cms.start_auto_warmup(interval);
        tracing::info!("CMS warm-up every {}s", interval.as_secs());
    }

    let identity: Arc<dyn IdentityStore> =
        match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => Arc::new(SupabaseIdentityClient::new(url, key.clone())?),
            _ => Arc::new(NoIdentityStore),
        };

    let email: Arc<dyn EmailDispatcher> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendEmailClient::new(
            &config.resend_api_url,
            api_key.clone(),
            &config.email_sender_name,
            &config.from_email,
            config.email_reply_to.clone(),
            config.signup_base_url.clone(),
            TokenIssuer::new(&config.email_link_secret, clock.clone()),
        )?),
        None => Arc::new(DisabledEmail),
    };

    let integrations = Integrations {
        lead_store: "postgres".to_string(),
        identity_store: identity.name().to_string(),
        email_provider: email.name().to_string(),
        cms_provider: cms.provider_name().to_string(),
        cache_backend: cms.cache_backend().to_string(),
    };
    tracing::info!("Integrations: {:?}", integrations);

    let repository = LeadRepository::new(Arc::new(PgLeadStore::new(db.pool.clone())), identity);
    let leads = LeadCaptureService::new(
        repository,
        Arc::new(RateLimiter::new(clock.clone())),
        email,
        config.block_suspicious_leads,
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        leads,
        cms,
        db: Some(db.pool.clone()),
        integrations,
    });

    // Transport-level burst guard: 10 req/s per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses the governor
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
