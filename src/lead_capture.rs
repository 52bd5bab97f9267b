//! Lead-capture request flows.
//!
//! Each flow checks its own rate-limit bucket first, then sanitizes and
//! validates the input, and only then touches storage. Only throttling,
//! validation and duplicate checks reject the client; once a lead is stored a
//! failed welcome email is reported as `emailSent: false`.

use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::email_client::EmailDispatcher;
use crate::errors::AppError;
use crate::lead_repository::LeadRepository;
use crate::models::{
    CheckEmailResponse, EmailSendResult, LeadCaptureRequest, LeadCaptureResponse,
    LinkProfileRequest, LinkProfileResponse, NewLeadCapture, WelcomeEmail,
};
use crate::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
use crate::security::{
    detect_suspicious_activity, redact_identifier, sanitize_email, sanitize_string, ActivitySample,
};
use crate::validation::{
    validate_check_email, validate_lead_capture, validate_link_profile, LeadCaptureInput,
};

/// How long a capture for one email blocks a concurrent capture for the same email.
pub const IN_FLIGHT_TTL: Duration = Duration::from_secs(60);

const CAPTURE_SUCCESS: &str = "Lead capturado com sucesso! Verifique seu email para continuar.";
const LINK_SUCCESS: &str = "Lead vinculado com sucesso! Bem-vindo ao Meu Studio AI.";

/// Who is calling, as far as throttling and bot heuristics care.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub identifier: String,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct LeadCaptureService {
    repository: LeadRepository,
    rate_limiter: Arc<RateLimiter>,
    email: Arc<dyn EmailDispatcher>,
    in_flight: Cache<String, i64>,
    block_suspicious: bool,
}

impl LeadCaptureService {
    pub fn new(
        repository: LeadRepository,
        rate_limiter: Arc<RateLimiter>,
        email: Arc<dyn EmailDispatcher>,
        block_suspicious: bool,
    ) -> Self {
        let in_flight = Cache::builder()
            .time_to_live(IN_FLIGHT_TTL)
            .max_capacity(10_000)
            .build();

        Self {
            repository,
            rate_limiter,
            email,
            in_flight,
            block_suspicious,
        }
    }

    pub fn repository(&self) -> &LeadRepository {
        &self.repository
    }

    fn throttle(
        &self,
        namespace: &str,
        client: &ClientContext,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, AppError> {
        let key = format!("{}:{}", namespace, client.identifier);
        let decision = self.rate_limiter.check(&key, config);
        if decision.allowed {
            return Ok(decision);
        }

        tracing::warn!(
            "Rate limit hit on {} for client {}",
            namespace,
            redact_identifier(&client.identifier)
        );
        Err(AppError::RateLimited {
            retry_after: decision.retry_after_secs(self.rate_limiter.now_millis()),
            message: config.message.to_string(),
        })
    }

    /// Full capture flow for a raw JSON body.
    pub async fn capture(
        &self,
        client: &ClientContext,
        body: &[u8],
    ) -> Result<LeadCaptureResponse, AppError> {
        let rate_limit = self.throttle("capture", client, &RateLimitConfig::CAPTURE)?;

        let request: LeadCaptureRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Corpo da requisição inválido: {}", e)))?;

        let input = LeadCaptureInput {
            name: sanitize_string(request.name.as_deref().unwrap_or_default()),
            email: sanitize_email(request.email.as_deref().unwrap_or_default()),
            whatsapp: request.whatsapp.as_deref().map(sanitize_string),
            origin: sanitize_string(request.origin.as_deref().unwrap_or_default()),
            answers: request
                .answers
                .unwrap_or_else(|| Value::Object(Default::default())),
        };
        let valid = validate_lead_capture(input)?;

        // Only one capture per email may be in flight in this process
        let guard_key = valid.email.to_lowercase();
        let entry = self
            .in_flight
            .entry(guard_key.clone())
            .or_insert(chrono::Utc::now().timestamp_millis())
            .await;
        if !entry.is_fresh() {
            tracing::warn!("Concurrent capture blocked for lead email {}", redact_identifier(&guard_key));
            return Err(AppError::email_exists());
        }

        let result = self.persist_and_notify(client, valid).await;
        self.in_flight.invalidate(&guard_key).await;

        let (lead_id, email_sent) = result?;
        tracing::info!(
            "Lead captured: lead_id={} email_sent={} client={}",
            lead_id,
            email_sent,
            redact_identifier(&client.identifier)
        );

        Ok(LeadCaptureResponse {
            ok: true,
            lead_id,
            email_sent,
            message: CAPTURE_SUCCESS.to_string(),
            rate_limit: rate_limit.info(),
        })
    }

    async fn persist_and_notify(
        &self,
        client: &ClientContext,
        valid: crate::validation::ValidLeadCapture,
    ) -> Result<(uuid::Uuid, bool), AppError> {
        if self.repository.check_email_exists(&valid.email).await? {
            return Err(AppError::email_exists());
        }

        let suspicion = detect_suspicious_activity(ActivitySample {
            name: &valid.name,
            email: &valid.email,
            whatsapp: valid.whatsapp.as_deref(),
            user_agent: client.user_agent.as_deref(),
        });
        if suspicion.suspicious {
            tracing::warn!(
                "Suspicious lead submission from client {}: {:?}",
                redact_identifier(&client.identifier),
                suspicion.reasons
            );
            if self.block_suspicious {
                return Err(AppError::BadRequest("Atividade suspeita detectada".to_string()));
            }
        }

        let lead = self
            .repository
            .create_lead_capture(&NewLeadCapture {
                email: valid.email,
                name: valid.name,
                whatsapp: valid.whatsapp,
                origin: valid.origin,
                answers: valid.answers,
            })
            .await?;

        let result = self
            .email
            .send_welcome_email(&WelcomeEmail {
                lead_id: lead.id,
                name: lead.name.clone(),
                email: lead.email.clone(),
                whatsapp: lead.whatsapp.clone(),
                origin: lead.origin.clone(),
            })
            .await;
        if let Some(error) = &result.error {
            tracing::warn!("Lead {} stored but welcome email not sent: {}", lead.id, error);
        }

        Ok((lead.id, result.success))
    }

    /// Reports whether an email can still be used for a new lead.
    pub async fn check_email(
        &self,
        client: &ClientContext,
        email: Option<&str>,
    ) -> Result<CheckEmailResponse, AppError> {
        let rate_limit = self.throttle("check_email", client, &RateLimitConfig::CHECK_EMAIL)?;

        let raw = email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::BadRequest("Parâmetro email é obrigatório".to_string()))?;
        let email = validate_check_email(&sanitize_email(raw))?;

        let exists = self.repository.check_email_exists(&email).await?;
        tracing::info!(
            "Email check: exists={} client={}",
            exists,
            redact_identifier(&client.identifier)
        );

        Ok(CheckEmailResponse {
            ok: true,
            available: !exists,
            email,
            message: if exists {
                "Este email já está cadastrado".to_string()
            } else {
                "Email disponível".to_string()
            },
            rate_limit: rate_limit.info(),
        })
    }

    /// Attaches a newly created account to its pending lead.
    pub async fn link_profile(
        &self,
        client: &ClientContext,
        body: &[u8],
    ) -> Result<LinkProfileResponse, AppError> {
        let rate_limit = self.throttle("link_profile", client, &RateLimitConfig::LINK_PROFILE)?;

        let request: LinkProfileRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Corpo da requisição inválido: {}", e)))?;
        let input = validate_link_profile(
            &sanitize_email(request.email.as_deref().unwrap_or_default()),
            &sanitize_string(request.user_id.as_deref().unwrap_or_default()),
        )?;

        let lead = self
            .repository
            .link_lead_with_profile(&input.email, &input.user_id)
            .await?;
        tracing::info!(
            "Lead {} linked to user {} client={}",
            lead.id,
            input.user_id,
            redact_identifier(&client.identifier)
        );

        Ok(LinkProfileResponse {
            ok: true,
            lead_id: lead.id,
            user_id: input.user_id,
            status: lead.status,
            message: LINK_SUCCESS.to_string(),
            rate_limit: rate_limit.info(),
        })
    }

    /// Sends the welcome template to an arbitrary address. No lead is stored.
    pub async fn send_test_email(
        &self,
        to: &str,
        name: &str,
        origin: &str,
    ) -> Result<EmailSendResult, AppError> {
        let email = validate_check_email(&sanitize_email(to))?;
        tracing::info!("Sending test welcome email via {}", self.email.name());
        Ok(self
            .email
            .send_welcome_email(&WelcomeEmail {
                lead_id: uuid::Uuid::nil(),
                name: sanitize_string(name),
                email,
                whatsapp: None,
                origin: sanitize_string(origin),
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity_client::NoIdentityStore;
    use crate::lead_repository::InMemoryLeadStore;
    use crate::models::{EmailSendResult, LeadStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<WelcomeEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailDispatcher for RecordingEmail {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_welcome_email(&self, email: &WelcomeEmail) -> EmailSendResult {
            self.sent.lock().unwrap().push(email.clone());
            if self.fail {
                EmailSendResult::failed("provider down")
            } else {
                EmailSendResult::sent(Some("msg-1".to_string()))
            }
        }
    }

    fn service_with(email: Arc<RecordingEmail>, block_suspicious: bool) -> LeadCaptureService {
        let clock = Arc::new(ManualClock::new(1_750_000_000_000));
        let repository =
            LeadRepository::new(Arc::new(InMemoryLeadStore::new()), Arc::new(NoIdentityStore));
        LeadCaptureService::new(
            repository,
            Arc::new(RateLimiter::new(clock)),
            email,
            block_suspicious,
        )
    }

    fn client() -> ClientContext {
        ClientContext {
            identifier: "203.0.113.7-Mozilla/5.0".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    fn capture_body(email: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
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
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_capture_stores_and_emails() {
        let email = Arc::new(RecordingEmail::default());
        let service = service_with(email.clone(), false);

        let response = service
            .capture(&client(), &capture_body("  Ana@X.com "))
            .await
            .unwrap();
        assert!(response.ok);
        assert!(response.email_sent);
        assert_eq!(response.rate_limit.remaining, 2);

        let sent = email.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email, "ana@x.com");
        assert_eq!(sent[0].lead_id, response.lead_id);
    }

    #[tokio::test]
    async fn test_second_capture_is_duplicate() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);
        service.capture(&client(), &capture_body("ana@x.com")).await.unwrap();

        let err = service
            .capture(&client(), &capture_body("ana@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { code: "EMAIL_EXISTS", .. }));
    }

    #[tokio::test]
    async fn test_email_failure_keeps_lead() {
        let email = Arc::new(RecordingEmail {
            fail: true,
            ..Default::default()
        });
        let service = service_with(email, false);

        let response = service
            .capture(&client(), &capture_body("ana@x.com"))
            .await
            .unwrap();
        assert!(!response.email_sent);
        assert!(service
            .repository()
            .get_lead_by_email("ana@x.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_fourth_capture_is_throttled() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);
        for i in 0..3 {
            let _ = service
                .capture(&client(), &capture_body(&format!("user{}@x.com", i)))
                .await;
        }
        let err = service
            .capture(&client(), &capture_body("late@x.com"))
            .await
            .unwrap_err();
        match err {
            AppError::RateLimited { retry_after, .. } => assert_eq!(retry_after, 3600),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_payloads() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);

        let err = service.capture(&client(), b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = service.capture(&client(), b"{}").await.unwrap_err();
        match err {
            AppError::Validation(v) => {
                assert!(v.has_field("name"));
                assert!(v.has_field("email"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suspicious_blocked_only_when_enabled() {
        let bot = ClientContext {
            identifier: "198.51.100.1-curl/8.0".to_string(),
            user_agent: Some("curl/8.0".to_string()),
        };

        let lenient = service_with(Arc::new(RecordingEmail::default()), false);
        assert!(lenient.capture(&bot, &capture_body("ana@x.com")).await.is_ok());

        let strict = service_with(Arc::new(RecordingEmail::default()), true);
        let err = strict
            .capture(&bot, &capture_body("ana@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_duplicate_wins_over_suspicion() {
        let strict = service_with(Arc::new(RecordingEmail::default()), true);
        strict.capture(&client(), &capture_body("ana@x.com")).await.unwrap();

        let bot = ClientContext {
            identifier: "198.51.100.1-curl/8.0".to_string(),
            user_agent: Some("curl/8.0".to_string()),
        };
        let err = strict
            .capture(&bot, &capture_body("ana@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { code: "EMAIL_EXISTS", .. }));
    }

    #[tokio::test]
    async fn test_check_email_flow() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);

        let err = service.check_email(&client(), None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let response = service.check_email(&client(), Some("Ana@X.com")).await.unwrap();
        assert!(response.available);
        assert_eq!(response.email, "ana@x.com");

        service.capture(&client(), &capture_body("ana@x.com")).await.unwrap();
        let response = service.check_email(&client(), Some("ana@x.com")).await.unwrap();
        assert!(!response.available);
    }

    #[tokio::test]
    async fn test_check_email_has_its_own_bucket() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);
        for _ in 0..10 {
            service.check_email(&client(), Some("a@x.com")).await.unwrap();
        }
        assert!(matches!(
            service.check_email(&client(), Some("a@x.com")).await,
            Err(AppError::RateLimited { .. })
        ));
        assert!(service.capture(&client(), &capture_body("ana@x.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_link_profile_flow() {
        let service = service_with(Arc::new(RecordingEmail::default()), false);
        let body = serde_json::to_vec(&json!({"email": "ana@x.com", "user_id": "user-1"})).unwrap();

        let err = service.link_profile(&client(), &body).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { code: "LEAD_NOT_FOUND", .. }));

        service.capture(&client(), &capture_body("ana@x.com")).await.unwrap();
        let response = service.link_profile(&client(), &body).await.unwrap();
        assert_eq!(response.status, LeadStatus::EmailValidated);
        assert_eq!(response.user_id, "user-1");

        let err = service.link_profile(&client(), &body).await.unwrap_err();
        assert!(matches!(err, AppError::LeadAlreadyProcessed { .. }));
    }
}
