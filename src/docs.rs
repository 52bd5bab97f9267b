use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::OpenApi;

use crate::cache;
use crate::cms;
use crate::handlers;
use crate::models;
use crate::validation;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Health ---
        handlers::health,

        // --- Leads ---
        handlers::capture_lead,
        handlers::check_email,
        handlers::link_profile,

        // --- Admin ---
        handlers::lead_analytics,
        handlers::update_lead_status,
        handlers::send_test_email,

        // --- CMS ---
        handlers::get_cms_content,
        handlers::cms_content_action,
        handlers::cms_health,
    ),
    components(
        schemas(
            // --- Leads ---
            models::LeadStatus,
            models::StoreType,
            models::MainChallenge,
            models::BudgetRange,
            models::Timeline,
            models::QualificationAnswers,
            models::LeadCapture,
            models::LeadStats,
            models::LeadCaptureRequest,
            models::LeadCaptureResponse,
            models::RateLimitInfo,
            models::CheckEmailResponse,
            models::LinkProfileRequest,
            models::LinkProfileResponse,
            validation::FieldError,

            // --- Admin ---
            handlers::UpdateStatusRequest,
            handlers::TestEmailRequest,
            handlers::Integrations,

            // --- CMS ---
            handlers::CmsContentResponse,
            handlers::CmsActionRequest,
            handlers::CmsHealthResponse,
            cms::CmsHealth,
            cms::HealthStatus,
            cache::CacheStats,
        )
    ),
    tags(
        (name = "Health", description = "Estado do serviço"),
        (name = "Leads", description = "Captura e vinculação de leads"),
        (name = "Admin", description = "Consultas e manutenção de leads"),
        (name = "CMS", description = "Conteúdo da landing page")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "admin_key",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}
