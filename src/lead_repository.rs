//! Lead persistence: the `lead_captures` table plus the external identity store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::identity_client::IdentityStore;
use crate::models::{LeadCapture, LeadCaptureRow, LeadStats, LeadStatus, NewLeadCapture};

/// Column changes applied together with a status move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub validated_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
}

/// Storage backend for captured leads. Emails are compared case-insensitively.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Inserts a `pending` lead. An email that already exists is a
    /// `Duplicate` error.
    async fn insert(&self, lead: &NewLeadCapture) -> Result<LeadCapture, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadCapture>, AppError>;

    /// Moves the lead from `from` to `to`. Returns `None` when no lead with
    /// this email is currently in `from`.
    async fn update_status(
        &self,
        email: &str,
        from: LeadStatus,
        to: LeadStatus,
        patch: &StatusPatch,
    ) -> Result<Option<LeadCapture>, AppError>;

    /// Leads in `status`, newest first.
    async fn list_by_status(&self, status: LeadStatus) -> Result<Vec<LeadCapture>, AppError>;

    async fn all_statuses(&self) -> Result<Vec<LeadStatus>, AppError>;
}

const LEAD_COLUMNS: &str = "id, email, name, whatsapp, origin, answers, status, user_id, \
                            created_at, validated_at, converted_at";

/// Postgres-backed lead store.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_lead(row: LeadCaptureRow) -> Result<LeadCapture, AppError> {
    LeadCapture::try_from(row)
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert(&self, lead: &NewLeadCapture) -> Result<LeadCapture, AppError> {
        let sql = format!(
            "INSERT INTO lead_captures (id, email, name, whatsapp, origin, answers, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            LEAD_COLUMNS
        );

        let result = sqlx::query_as::<_, LeadCaptureRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&lead.email)
            .bind(&lead.name)
            .bind(&lead.whatsapp)
            .bind(&lead.origin)
            .bind(sqlx::types::Json(&lead.answers))
            .bind(LeadStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => into_lead(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::email_exists())
            }
            Err(e) => Err(AppError::Persistence(format!("Failed to create lead: {}", e))),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadCapture>, AppError> {
        let sql = format!(
            "SELECT {} FROM lead_captures WHERE lower(email) = lower($1)",
            LEAD_COLUMNS
        );
        let row = sqlx::query_as::<_, LeadCaptureRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get lead")?;
        row.map(into_lead).transpose()
    }

    async fn update_status(
        &self,
        email: &str,
        from: LeadStatus,
        to: LeadStatus,
        patch: &StatusPatch,
    ) -> Result<Option<LeadCapture>, AppError> {
        let sql = format!(
            "UPDATE lead_captures SET status = $3, \
                 validated_at = COALESCE($4, validated_at), \
                 converted_at = COALESCE($5, converted_at), \
                 user_id = COALESCE($6, user_id) \
             WHERE lower(email) = lower($1) AND status = $2 \
             RETURNING {}",
            LEAD_COLUMNS
        );
        let row = sqlx::query_as::<_, LeadCaptureRow>(&sql)
            .bind(email)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(patch.validated_at)
            .bind(patch.converted_at)
            .bind(&patch.user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to update lead status: {}", e)))?;
        row.map(into_lead).transpose()
    }

    async fn list_by_status(&self, status: LeadStatus) -> Result<Vec<LeadCapture>, AppError> {
        let sql = format!(
            "SELECT {} FROM lead_captures WHERE status = $1 ORDER BY created_at DESC",
            LEAD_COLUMNS
        );
        let rows = sqlx::query_as::<_, LeadCaptureRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to get leads by status")?;
        rows.into_iter().map(into_lead).collect()
    }

    async fn all_statuses(&self) -> Result<Vec<LeadStatus>, AppError> {
        let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM lead_captures")
            .fetch_all(&self.pool)
            .await
            .context("Failed to get lead stats")?;
        statuses
            .iter()
            .map(|s| s.parse::<LeadStatus>().map_err(AppError::Persistence))
            .collect()
    }
}

/// Process-local lead store for tests and local runs without a database.
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: Mutex<HashMap<String, LeadCapture>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LeadCapture>> {
        self.leads.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert(&self, lead: &NewLeadCapture) -> Result<LeadCapture, AppError> {
        let key = lead.email.to_lowercase();
        let mut leads = self.lock();
        if leads.contains_key(&key) {
            return Err(AppError::email_exists());
        }
        let record = LeadCapture {
            id: Uuid::new_v4(),
            email: lead.email.clone(),
            name: lead.name.clone(),
            whatsapp: lead.whatsapp.clone(),
            origin: lead.origin.clone(),
            answers: lead.answers.clone(),
            status: LeadStatus::Pending,
            user_id: None,
            created_at: Utc::now(),
            validated_at: None,
            converted_at: None,
        };
        leads.insert(key, record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LeadCapture>, AppError> {
        Ok(self.lock().get(&email.to_lowercase()).cloned())
    }

    async fn update_status(
        &self,
        email: &str,
        from: LeadStatus,
        to: LeadStatus,
        patch: &StatusPatch,
    ) -> Result<Option<LeadCapture>, AppError> {
        let mut leads = self.lock();
        let Some(lead) = leads
            .get_mut(&email.to_lowercase())
            .filter(|lead| lead.status == from)
        else {
            return Ok(None);
        };
        lead.status = to;
        if patch.validated_at.is_some() {
            lead.validated_at = patch.validated_at;
        }
        if patch.converted_at.is_some() {
            lead.converted_at = patch.converted_at;
        }
        if patch.user_id.is_some() {
            lead.user_id = patch.user_id.clone();
        }
        Ok(Some(lead.clone()))
    }

    async fn list_by_status(&self, status: LeadStatus) -> Result<Vec<LeadCapture>, AppError> {
        let mut leads: Vec<LeadCapture> = self
            .lock()
            .values()
            .filter(|lead| lead.status == status)
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(leads)
    }

    async fn all_statuses(&self) -> Result<Vec<LeadStatus>, AppError> {
        Ok(self.lock().values().map(|lead| lead.status).collect())
    }
}

/// Lead operations over a store and the identity store.
#[derive(Clone)]
pub struct LeadRepository {
    store: Arc<dyn LeadStore>,
    identity: Arc<dyn IdentityStore>,
}

impl LeadRepository {
    pub fn new(store: Arc<dyn LeadStore>, identity: Arc<dyn IdentityStore>) -> Self {
        Self { store, identity }
    }

    pub async fn create_lead_capture(&self, lead: &NewLeadCapture) -> Result<LeadCapture, AppError> {
        self.store.insert(lead).await
    }

    /// True if the email is a known lead or a registered account.
    ///
    /// The account lookup only covers the first page of users.
    pub async fn check_email_exists(&self, email: &str) -> Result<bool, AppError> {
        if self.store.find_by_email(email).await?.is_some() {
            return Ok(true);
        }
        self.identity
            .email_registered(email)
            .await
            .context("Failed to check auth email")
    }

    pub async fn get_lead_by_email(&self, email: &str) -> Result<Option<LeadCapture>, AppError> {
        self.store.find_by_email(email).await
    }

    /// Advances a lead to `status`, stamping `validated_at` or `converted_at`
    /// with `timestamp` (or now) where the target status calls for it.
    pub async fn update_lead_status(
        &self,
        email: &str,
        status: LeadStatus,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<LeadCapture, AppError> {
        self.transition(email, status, timestamp, None).await
    }

    /// Links a pending lead to a freshly created account and marks its email
    /// as validated.
    pub async fn link_lead_with_profile(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<LeadCapture, AppError> {
        let lead = self.require_lead(email).await?;
        if lead.status != LeadStatus::Pending {
            return Err(AppError::LeadAlreadyProcessed {
                current_status: lead.status,
            });
        }
        self.transition(
            email,
            LeadStatus::EmailValidated,
            Some(Utc::now()),
            Some(user_id.to_string()),
        )
        .await
    }

    pub async fn get_leads_by_status(&self, status: LeadStatus) -> Result<Vec<LeadCapture>, AppError> {
        self.store.list_by_status(status).await
    }

    /// Per-status tally over every lead.
    pub async fn get_lead_stats(&self) -> Result<LeadStats, AppError> {
        Ok(LeadStats::tally(self.store.all_statuses().await?))
    }

    async fn require_lead(&self, email: &str) -> Result<LeadCapture, AppError> {
        self.store
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound {
                code: "LEAD_NOT_FOUND",
                message: "Lead não encontrado. Verifique o email ou crie um novo lead.".to_string(),
            })
    }

    async fn transition(
        &self,
        email: &str,
        to: LeadStatus,
        timestamp: Option<DateTime<Utc>>,
        user_id: Option<String>,
    ) -> Result<LeadCapture, AppError> {
        let lead = self.require_lead(email).await?;
        lead.status.validate_transition(to)?;

        let at = timestamp.unwrap_or_else(Utc::now);
        let patch = StatusPatch {
            validated_at: (to == LeadStatus::EmailValidated).then_some(at),
            converted_at: (to == LeadStatus::Converted).then_some(at),
            user_id,
        };

        match self.store.update_status(email, lead.status, to, &patch).await? {
            Some(updated) => {
                tracing::info!("Lead {} moved {} -> {}", updated.id, lead.status, to);
                Ok(updated)
            }
            // Someone else moved the lead between our read and the update
            None => match self.store.find_by_email(email).await? {
                Some(current) => Err(AppError::InvalidTransition {
                    from: current.status,
                    to,
                }),
                None => Err(AppError::Persistence(
                    "Failed to update lead status: lead disappeared".to_string(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_client::NoIdentityStore;
    use crate::models::{BudgetRange, MainChallenge, QualificationAnswers, StoreType, Timeline};

    struct KnownAccounts(Vec<&'static str>);

    #[async_trait]
    impl IdentityStore for KnownAccounts {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn email_registered(&self, email: &str) -> Result<bool, AppError> {
            Ok(self.0.iter().any(|known| known.eq_ignore_ascii_case(email)))
        }
    }

    struct BrokenAccounts;

    #[async_trait]
    impl IdentityStore for BrokenAccounts {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn email_registered(&self, _email: &str) -> Result<bool, AppError> {
            Err(AppError::ExternalApiError("auth down".to_string()))
        }
    }

    fn new_lead(email: &str) -> NewLeadCapture {
        NewLeadCapture {
            email: email.to_string(),
            name: "Ana Silva".to_string(),
            whatsapp: Some("(11) 91234-5678".to_string()),
            origin: "google_ads".to_string(),
            answers: QualificationAnswers {
                is_store_owner: true,
                store_type: StoreType::Ecommerce,
                current_tools: None,
                main_challenge: MainChallenge::ProductPhotos,
                budget_range: BudgetRange::Under100,
                timeline: Timeline::Immediate,
            },
        }
    }

    fn repo() -> LeadRepository {
        LeadRepository::new(Arc::new(InMemoryLeadStore::new()), Arc::new(NoIdentityStore))
    }

    #[tokio::test]
    async fn test_create_defaults_to_pending() {
        let repo = repo();
        let lead = repo.create_lead_capture(&new_lead("ana@x.com")).await.unwrap();
        assert_eq!(lead.status, LeadStatus::Pending);
        assert!(lead.validated_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_by_store() {
        let repo = repo();
        repo.create_lead_capture(&new_lead("ana@x.com")).await.unwrap();
        let err = repo
            .create_lead_capture(&new_lead("ANA@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { code: "EMAIL_EXISTS", .. }));
    }

    #[tokio::test]
    async fn test_check_email_exists_consults_both_sources() {
        let repo = LeadRepository::new(
            Arc::new(InMemoryLeadStore::new()),
            Arc::new(KnownAccounts(vec!["user@app.com"])),
        );
        repo.create_lead_capture(&new_lead("lead@x.com")).await.unwrap();

        assert!(repo.check_email_exists("lead@x.com").await.unwrap());
        assert!(repo.check_email_exists("user@app.com").await.unwrap());
        assert!(!repo.check_email_exists("new@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_failure_propagates() {
        let repo = LeadRepository::new(Arc::new(InMemoryLeadStore::new()), Arc::new(BrokenAccounts));
        let err = repo.check_email_exists("new@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::WithContext { .. }));
    }

    #[tokio::test]
    async fn test_missing_lead_is_none_not_error() {
        assert!(repo().get_lead_by_email("ghost@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_walks_forward_and_stamps_times() {
        let repo = repo();
        repo.create_lead_capture(&new_lead("ana@x.com")).await.unwrap();

        let at: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().unwrap();
        let lead = repo
            .update_lead_status("ana@x.com", LeadStatus::EmailValidated, Some(at))
            .await
            .unwrap();
        assert_eq!(lead.validated_at, Some(at));

        repo.update_lead_status("ana@x.com", LeadStatus::WhatsappValidated, None)
            .await
            .unwrap();
        let lead = repo
            .update_lead_status("ana@x.com", LeadStatus::Converted, None)
            .await
            .unwrap();
        assert_eq!(lead.status, LeadStatus::Converted);
        assert!(lead.converted_at.is_some());
        assert_eq!(lead.validated_at, Some(at));
    }

    #[tokio::test]
    async fn test_backward_and_skipped_transitions_rejected() {
        let repo = repo();
        repo.create_lead_capture(&new_lead("ana@x.com")).await.unwrap();

        let err = repo
            .update_lead_status("ana@x.com", LeadStatus::Converted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        repo.update_lead_status("ana@x.com", LeadStatus::EmailValidated, None)
            .await
            .unwrap();
        let err = repo
            .update_lead_status("ana@x.com", LeadStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: LeadStatus::EmailValidated,
                to: LeadStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_lead_is_not_found() {
        let err = repo()
            .update_lead_status("ghost@x.com", LeadStatus::EmailValidated, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { code: "LEAD_NOT_FOUND", .. }));
    }

    #[tokio::test]
    async fn test_link_profile_stores_user_id_once() {
        let repo = repo();
        repo.create_lead_capture(&new_lead("ana@x.com")).await.unwrap();

        let lead = repo.link_lead_with_profile("ana@x.com", "user-42").await.unwrap();
        assert_eq!(lead.status, LeadStatus::EmailValidated);
        assert_eq!(lead.user_id.as_deref(), Some("user-42"));
        assert!(lead.validated_at.is_some());

        let err = repo
            .link_lead_with_profile("ana@x.com", "user-43")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::LeadAlreadyProcessed {
                current_status: LeadStatus::EmailValidated
            }
        ));
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let repo = repo();
        for email in ["a@x.com", "b@x.com", "c@x.com"] {
            repo.create_lead_capture(&new_lead(email)).await.unwrap();
        }
        repo.link_lead_with_profile("b@x.com", "u1").await.unwrap();

        let stats = repo.get_lead_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.email_validated, 1);

        let pending = repo.get_leads_by_status(LeadStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|l| l.status == LeadStatus::Pending));
    }
}
