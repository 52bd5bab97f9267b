use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::AppError;

/// Accounts listed per lookup. Stores larger than this are only partially
/// checked.
pub const USER_PAGE_SIZE: u32 = 1000;

/// External store of registered user accounts.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if an account with this email exists (case-insensitive).
    async fn email_registered(&self, email: &str) -> Result<bool, AppError>;
}

/// Used when no identity store is configured: nothing is registered.
pub struct NoIdentityStore;

#[async_trait]
impl IdentityStore for NoIdentityStore {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn email_registered(&self, _email: &str) -> Result<bool, AppError> {
        Ok(false)
    }
}

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    email: Option<String>,
}

/// Client for the Supabase Auth admin API.
#[derive(Clone)]
pub struct SupabaseIdentityClient {
    client: reqwest::Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseIdentityClient {
    pub fn new(base_url: &str, service_role_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Supabase client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key,
        })
    }

    /// Emails on the first page of registered users.
    pub async fn list_user_emails(&self) -> Result<Vec<String>, AppError> {
        let url = format!("{}/auth/v1/admin/users", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .query(&[("page", 1), ("per_page", USER_PAGE_SIZE)])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Supabase request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Failed to check auth email: Supabase returned {}: {}",
                status, error_text
            )));
        }

        let list: UserList = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Supabase user list: {}", e))
        })?;

        Ok(list.users.into_iter().filter_map(|u| u.email).collect())
    }
}

#[async_trait]
impl IdentityStore for SupabaseIdentityClient {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn email_registered(&self, email: &str) -> Result<bool, AppError> {
        let emails = self.list_user_emails().await?;
        Ok(emails.iter().any(|known| known.eq_ignore_ascii_case(email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_identity_store_knows_nobody() {
        assert!(!NoIdentityStore.email_registered("ana@x.com").await.unwrap());
    }

    #[test]
    fn test_user_list_tolerates_missing_emails() {
        let list: UserList =
            serde_json::from_str(r#"{"users": [{"email": "a@b.com"}, {"phone": "+55"}]}"#).unwrap();
        let emails: Vec<String> = list.users.into_iter().filter_map(|u| u.email).collect();
        assert_eq!(emails, vec!["a@b.com".to_string()]);
    }
}
