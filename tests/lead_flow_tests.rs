/// End-to-end tests of the HTTP surface over in-memory stores
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use landing_leads_api::cache::{ContentCache, MemoryCache};
use landing_leads_api::clock::{Clock, ManualClock};
use landing_leads_api::cms::{provider_from_config, CmsClient};
use landing_leads_api::config::Config;
use landing_leads_api::email_client::DisabledEmail;
use landing_leads_api::handlers::{build_router, AppState, Integrations};
use landing_leads_api::identity_client::NoIdentityStore;
use landing_leads_api::lead_capture::LeadCaptureService;
use landing_leads_api::lead_repository::{InMemoryLeadStore, LeadRepository};
use landing_leads_api::rate_limit::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-secret";

fn app() -> Router {
    let mut config = Config::for_tests("postgres://localhost/test");
    config.admin_api_key = Some(ADMIN_KEY.to_string());

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_750_000_000_000));
    let cache: Arc<dyn ContentCache> = Arc::new(MemoryCache::new(10, clock.clone()));
    let provider = provider_from_config(&config).unwrap();
    let cms = Arc::new(CmsClient::new(
        provider,
        cache,
        Duration::from_secs(60),
        clock.clone(),
    ));

    let repository =
        LeadRepository::new(Arc::new(InMemoryLeadStore::new()), Arc::new(NoIdentityStore));
    let leads = LeadCaptureService::new(
        repository,
        Arc::new(RateLimiter::new(clock)),
        Arc::new(DisabledEmail),
        false,
    );

    build_router(Arc::new(AppState {
        config,
        leads,
        integrations: Integrations {
            lead_store: "memory".to_string(),
            identity_store: "none".to_string(),
            email_provider: "disabled".to_string(),
            cms_provider: cms.provider_name().to_string(),
            cache_backend: cms.cache_backend().to_string(),
        },
        cms,
        db: None,
    }))
}

fn capture_payload(email: &str) -> Value {
    json!({
        "name": "Ana Silva",
        "email": email,
        "whatsapp": "(11) 91234-5678",
        "origin": "google_ads",
        "answers": {
            "is_store_owner": true,
            "store_type": "ecommerce",
            "main_challenge": "product_photos",
            "budget_range": "100_500",
            "timeline": "this_month"
        }
    })
}

fn post_json(uri: &str, ip: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_reports_integrations() {
    let app = app();
    let (status, body) = send(&app, get("/health", "198.51.100.1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["integrations"]["leadStore"], "memory");
    assert_eq!(body["integrations"]["cmsProvider"], "strapi");
}

#[tokio::test]
async fn test_capture_then_duplicate() {
    let app = app();

    let (status, body) = send(
        &app,
        post_json("/api/leads/capture", "198.51.100.2", &capture_payload("Ana@X.com")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["emailSent"], false);
    assert_eq!(body["rateLimit"]["remaining"], 2);
    assert!(body["leadId"].is_string());

    let (status, body) = send(
        &app,
        post_json("/api/leads/capture", "198.51.100.2", &capture_payload("ana@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "EMAIL_EXISTS");
}

#[tokio::test]
async fn test_capture_rejects_invalid_input() {
    let app = app();

    let mut payload = capture_payload("not-an-email");
    payload["name"] = json!("A");
    let (status, body) = send(&app, post_json("/api/leads/capture", "198.51.100.3", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"].as_array().is_some_and(|errors| !errors.is_empty()));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/leads/capture")
        .header("x-forwarded-for", "198.51.100.3")
        .body(Body::from("{broken"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_capture_is_throttled_per_client() {
    let app = app();

    for i in 0..3 {
        let (status, _) = send(
            &app,
            post_json(
                "/api/leads/capture",
                "198.51.100.4",
                &capture_payload(&format!("user{}@x.com", i)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/leads/capture",
            "198.51.100.4",
            &capture_payload("late@x.com"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "3600");

    // Another address still has its own budget
    let (status, _) = send(
        &app,
        post_json("/api/leads/capture", "198.51.100.5", &capture_payload("other@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_check_email() {
    let app = app();

    let (status, body) = send(&app, get("/api/leads/check-email", "198.51.100.6")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Parâmetro email é obrigatório");

    let (status, body) = send(
        &app,
        get("/api/leads/check-email?email=ana@x.com", "198.51.100.6"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["message"], "Email disponível");

    send(
        &app,
        post_json("/api/leads/capture", "198.51.100.6", &capture_payload("ana@x.com")),
    )
    .await;

    let (status, body) = send(
        &app,
        get("/api/leads/check-email?email=ANA@x.com", "198.51.100.6"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(body["email"], "ana@x.com");
}

#[tokio::test]
async fn test_link_profile_lifecycle() {
    let app = app();
    let link = json!({ "email": "ana@x.com", "user_id": "user-123" });

    let (status, body) = send(&app, post_json("/api/leads/link-profile", "198.51.100.7", &link)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "LEAD_NOT_FOUND");

    send(
        &app,
        post_json("/api/leads/capture", "198.51.100.7", &capture_payload("ana@x.com")),
    )
    .await;

    let (status, body) = send(&app, post_json("/api/leads/link-profile", "198.51.100.7", &link)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "user-123");
    assert_eq!(body["status"], "email_validated");

    let (status, body) = send(&app, post_json("/api/leads/link-profile", "198.51.100.7", &link)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "LEAD_ALREADY_PROCESSED");
    assert_eq!(body["currentStatus"], "email_validated");
}

#[tokio::test]
async fn test_analytics_requires_admin_key() {
    let app = app();

    let (status, body) = send(&app, get("/api/leads/analytics", "198.51.100.8")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let wrong = Request::builder()
        .uri("/api/leads/analytics")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_analytics_stats_and_listing() {
    let app = app();
    for email in ["a@x.com", "b@x.com"] {
        send(
            &app,
            post_json("/api/leads/capture", "198.51.100.9", &capture_payload(email)),
        )
        .await;
    }

    let authorized = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, authorized("/api/leads/analytics?type=stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["pending"], 2);

    let (status, body) = send(
        &app,
        authorized("/api/leads/analytics?type=leads&status=pending"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["status"], "pending");

    let (status, _) = send(&app, authorized("/api/leads/analytics?type=leads")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_status_update_moves_forward_only() {
    let app = app();
    send(
        &app,
        post_json("/api/leads/capture", "198.51.100.10", &capture_payload("ana@x.com")),
    )
    .await;

    let update = |status: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/leads/status")
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "ana@x.com", "status": status }).to_string(),
            ))
            .unwrap()
    };

    let (status, body) = send(&app, update("email_validated")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "email_validated");
    assert!(body["validated_at"].is_string());

    let (status, body) = send(&app, update("pending")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");
}

#[tokio::test]
async fn test_cms_without_provider() {
    let app = app();

    let (status, body) = send(&app, get("/api/cms/content", "198.51.100.11")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CMS_CONTENT_NOT_FOUND");

    let (status, body) = send(&app, get("/api/cms/health", "198.51.100.11")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert_eq!(body["cacheBackend"], "memory");

    let (status, body) = send(
        &app,
        post_json("/api/cms/content", "198.51.100.11", &json!({ "action": "clear_cache" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) = send(
        &app,
        post_json("/api/cms/content", "198.51.100.11", &json!({ "action": "explode" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_test_email() {
    let app = app();

    let send_test = |body: Value| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/email/test")
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    // No recipient and no TEST_EMAIL configured
    let (status, _) = send(&app, send_test(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, send_test(json!({ "to": "not-an-email" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    // The email provider is disabled, so the send itself fails
    let (status, body) = send(&app, send_test(json!({ "to": "ana@x.com" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
}
