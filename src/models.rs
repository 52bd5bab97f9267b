use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::AppError;

// ============ Lead Lifecycle ============

/// Lifecycle status of a captured lead.
///
/// Status only advances forward, one step at a time:
/// `pending -> email_validated -> whatsapp_validated -> converted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    EmailValidated,
    WhatsappValidated,
    Converted,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 4] = [
        LeadStatus::Pending,
        LeadStatus::EmailValidated,
        LeadStatus::WhatsappValidated,
        LeadStatus::Converted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::EmailValidated => "email_validated",
            LeadStatus::WhatsappValidated => "whatsapp_validated",
            LeadStatus::Converted => "converted",
        }
    }

    /// The only status this one may move to, if any.
    pub fn next(self) -> Option<LeadStatus> {
        match self {
            LeadStatus::Pending => Some(LeadStatus::EmailValidated),
            LeadStatus::EmailValidated => Some(LeadStatus::WhatsappValidated),
            LeadStatus::WhatsappValidated => Some(LeadStatus::Converted),
            LeadStatus::Converted => None,
        }
    }

    pub fn can_transition_to(self, target: LeadStatus) -> bool {
        self.next() == Some(target)
    }

    /// Rejects backward, repeated or skipped transitions.
    pub fn validate_transition(self, target: LeadStatus) -> Result<(), AppError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LeadStatus::Pending),
            "email_validated" => Ok(LeadStatus::EmailValidated),
            "whatsapp_validated" => Ok(LeadStatus::WhatsappValidated),
            "converted" => Ok(LeadStatus::Converted),
            other => Err(format!("unknown lead status: {}", other)),
        }
    }
}

// ============ Qualification Answers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    Ecommerce,
    Physical,
    Both,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MainChallenge {
    ProductPhotos,
    ModelPhotos,
    MarketingImages,
    SocialContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum BudgetRange {
    #[serde(rename = "under_100")]
    Under100,
    #[serde(rename = "100_500")]
    From100To500,
    #[serde(rename = "500_1000")]
    From500To1000,
    #[serde(rename = "over_1000")]
    Over1000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Timeline {
    Immediate,
    ThisMonth,
    NextQuarter,
    Later,
}

/// Answers from the multi-step qualification form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualificationAnswers {
    pub is_store_owner: bool,
    pub store_type: StoreType,
    /// Free-form list of the channels the lead already sells on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tools: Option<Vec<String>>,
    pub main_challenge: MainChallenge,
    pub budget_range: BudgetRange,
    pub timeline: Timeline,
}

// ============ Database Models ============

/// A captured lead as stored in `lead_captures`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadCapture {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub whatsapp: Option<String>,
    pub origin: String,
    pub answers: QualificationAnswers,
    pub status: LeadStatus,
    /// External account the lead was linked to after sign-up.
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
}

/// Raw row shape; `status` is stored as text and `answers` as JSONB.
#[derive(Debug, Clone, FromRow)]
pub struct LeadCaptureRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub whatsapp: Option<String>,
    pub origin: String,
    pub answers: sqlx::types::Json<QualificationAnswers>,
    pub status: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
}

impl TryFrom<LeadCaptureRow> for LeadCapture {
    type Error = AppError;

    fn try_from(row: LeadCaptureRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<LeadStatus>().map_err(AppError::Persistence)?;
        Ok(LeadCapture {
            id: row.id,
            email: row.email,
            name: row.name,
            whatsapp: row.whatsapp,
            origin: row.origin,
            answers: row.answers.0,
            status,
            user_id: row.user_id,
            created_at: row.created_at,
            validated_at: row.validated_at,
            converted_at: row.converted_at,
        })
    }
}

/// Fields required to insert a new lead. Status starts as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLeadCapture {
    pub email: String,
    pub name: String,
    pub whatsapp: Option<String>,
    pub origin: String,
    pub answers: QualificationAnswers,
}

/// Count of leads per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeadStats {
    pub total: u64,
    pub pending: u64,
    pub email_validated: u64,
    pub whatsapp_validated: u64,
    pub converted: u64,
}

impl LeadStats {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = LeadStatus>,
    {
        let mut stats = LeadStats::default();
        for status in statuses {
            stats.total += 1;
            match status {
                LeadStatus::Pending => stats.pending += 1,
                LeadStatus::EmailValidated => stats.email_validated += 1,
                LeadStatus::WhatsappValidated => stats.whatsapp_validated += 1,
                LeadStatus::Converted => stats.converted += 1,
            }
        }
        stats
    }
}

// ============ API Models ============

/// Lead-capture request body. Every field is optional at the parsing stage so
/// missing fields surface as validation messages instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LeadCaptureRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub origin: Option<String>,
    #[schema(value_type = Object)]
    pub answers: Option<Value>,
}

/// Remaining attempts in the caller's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub remaining: u32,
    /// Window reset time in milliseconds since the Unix epoch.
    pub reset_time: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadCaptureResponse {
    pub ok: bool,
    pub lead_id: Uuid,
    pub email_sent: bool,
    pub message: String,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CheckEmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckEmailResponse {
    pub ok: bool,
    pub available: bool,
    pub email: String,
    pub message: String,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LinkProfileRequest {
    pub email: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkProfileResponse {
    pub ok: bool,
    pub lead_id: Uuid,
    pub user_id: String,
    pub status: LeadStatus,
    pub message: String,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct AnalyticsQuery {
    /// `stats` (default) or `leads`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Status filter for `type=leads`.
    pub status: Option<String>,
}

/// Welcome-email input assembled from a freshly persisted lead.
#[derive(Debug, Clone, PartialEq)]
pub struct WelcomeEmail {
    pub lead_id: Uuid,
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
    pub origin: String,
}

/// Outcome of a send attempt. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailSendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl EmailSendResult {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}
