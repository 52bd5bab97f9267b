//! Structural validation of sanitized request payloads.
//!
//! Every schema collects all field problems before failing, so the client
//! gets one message per invalid field instead of only the first.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use utoipa::ToSchema;

use crate::models::{
    BudgetRange, LeadStatus, MainChallenge, QualificationAnswers, StoreType, Timeline,
};
use crate::security::{is_dynamic_ref_code, validate_origin, MAX_EMAIL_LEN};

// RFC 5322 simplified email regex, requiring at least one dot in the domain
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-ZÀ-ÿ\s]+$").expect("name regex is valid"));

static WHATSAPP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\([0-9]{2}\)\s[0-9]{4,5}-[0-9]{4}$").expect("whatsapp regex is valid")
});

/// A single invalid field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Rejection carrying one message per invalid field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(field, message)],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn push(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Lead-capture payload after sanitization, before validation.
#[derive(Debug, Clone)]
pub struct LeadCaptureInput {
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
    pub origin: String,
    pub answers: Value,
}

/// Lead-capture payload that passed every field rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidLeadCapture {
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
    pub origin: String,
    pub answers: QualificationAnswers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProfileInput {
    pub email: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatusInput {
    pub email: String,
    pub status: LeadStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Email shape check. Length is checked separately by the schemas.
pub fn is_valid_email(email: &str) -> bool {
    email.len() >= 5 && EMAIL_RE.is_match(email)
}

/// Origin is a fixed marketing-channel tag or an upper-case `REF_`/`VENDEDOR_` code.
pub fn is_valid_origin(origin: &str) -> bool {
    validate_origin(origin) || is_dynamic_ref_code(origin)
}

fn check_email(errors: &mut ValidationError, field: &str, email: &str) {
    if !is_valid_email(email) {
        errors.push(field, "Email inválido");
    } else if email.chars().count() > MAX_EMAIL_LEN {
        errors.push(field, "Email muito longo");
    }
}

fn check_name(errors: &mut ValidationError, name: &str) {
    let len = name.chars().count();
    if len < 2 {
        errors.push("name", "Nome deve ter pelo menos 2 caracteres");
    } else if len > 100 {
        errors.push("name", "Nome deve ter no máximo 100 caracteres");
    } else if !NAME_RE.is_match(name) {
        errors.push("name", "Nome deve conter apenas letras e espaços");
    }
}

fn enum_field<T: DeserializeOwned>(
    errors: &mut ValidationError,
    answers: &serde_json::Map<String, Value>,
    key: &str,
    message: &str,
) -> Option<T> {
    let field = format!("answers.{}", key);
    match answers.get(key) {
        Some(value) => match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                errors.push(&field, message);
                None
            }
        },
        None => {
            errors.push(&field, "Campo obrigatório");
            None
        }
    }
}

fn check_answers(errors: &mut ValidationError, answers: &Value) -> Option<QualificationAnswers> {
    let Some(map) = answers.as_object() else {
        errors.push("answers", "Respostas do questionário são obrigatórias");
        return None;
    };

    let is_store_owner = enum_field::<bool>(
        errors,
        map,
        "is_store_owner",
        "Informe se você possui uma loja",
    );
    let store_type = enum_field::<StoreType>(errors, map, "store_type", "Tipo de loja inválido");

    let current_tools = match map.get("current_tools") {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<Vec<String>>(value.clone()) {
            Ok(tools) => Some(tools),
            Err(_) => {
                errors.push(
                    "answers.current_tools",
                    "Ferramentas atuais devem ser uma lista de textos",
                );
                None
            }
        },
    };

    let main_challenge = enum_field::<MainChallenge>(
        errors,
        map,
        "main_challenge",
        "Desafio principal inválido",
    );
    let budget_range =
        enum_field::<BudgetRange>(errors, map, "budget_range", "Faixa de orçamento inválida");
    let timeline = enum_field::<Timeline>(errors, map, "timeline", "Prazo inválido");

    Some(QualificationAnswers {
        is_store_owner: is_store_owner?,
        store_type: store_type?,
        current_tools,
        main_challenge: main_challenge?,
        budget_range: budget_range?,
        timeline: timeline?,
    })
}

/// Lead-capture schema: name, email, optional WhatsApp, origin and the six
/// qualification answers.
pub fn validate_lead_capture(input: LeadCaptureInput) -> Result<ValidLeadCapture, ValidationError> {
    let mut errors = ValidationError::default();

    check_name(&mut errors, &input.name);
    check_email(&mut errors, "email", &input.email);

    let whatsapp = input.whatsapp.filter(|w| !w.is_empty());
    if let Some(ref number) = whatsapp {
        if !WHATSAPP_RE.is_match(number) {
            errors.push(
                "whatsapp",
                "WhatsApp deve estar no formato (11) 99999-9999",
            );
        }
    }

    if !is_valid_origin(&input.origin) {
        errors.push("origin", "Origem inválida");
    }

    let answers = check_answers(&mut errors, &input.answers);

    match answers {
        Some(answers) if errors.errors.is_empty() => Ok(ValidLeadCapture {
            name: input.name,
            email: input.email,
            whatsapp,
            origin: input.origin,
            answers,
        }),
        _ => Err(errors),
    }
}

/// Check-email schema: a single email field.
pub fn validate_check_email(email: &str) -> Result<String, ValidationError> {
    let mut errors = ValidationError::default();
    check_email(&mut errors, "email", email);
    errors.into_result(email.to_string())
}

/// Link-profile schema: email plus an opaque, non-empty user identifier.
pub fn validate_link_profile(email: &str, user_id: &str) -> Result<LinkProfileInput, ValidationError> {
    let mut errors = ValidationError::default();
    check_email(&mut errors, "email", email);
    if user_id.is_empty() {
        errors.push("user_id", "User ID é obrigatório");
    }
    errors.into_result(LinkProfileInput {
        email: email.to_string(),
        user_id: user_id.to_string(),
    })
}

/// Status-update schema: email, target status and an optional RFC 3339 timestamp.
pub fn validate_update_status(
    email: &str,
    status: &str,
    timestamp: Option<&str>,
) -> Result<UpdateStatusInput, ValidationError> {
    let mut errors = ValidationError::default();
    check_email(&mut errors, "email", email);

    let parsed_status = match status.parse::<LeadStatus>() {
        Ok(s) => Some(s),
        Err(_) => {
            errors.push("status", "Status inválido");
            None
        }
    };

    let parsed_timestamp = match timestamp {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(_) => {
                errors.push("timestamp", "Timestamp deve estar no formato ISO 8601");
                None
            }
        },
        None => None,
    };

    match parsed_status {
        Some(status) if errors.errors.is_empty() => Ok(UpdateStatusInput {
            email: email.to_string(),
            status,
            timestamp: parsed_timestamp,
        }),
        _ => Err(errors),
    }
}
