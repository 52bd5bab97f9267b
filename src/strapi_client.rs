use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::cms::ContentProvider;
use crate::cms_models::{
    CmsContent, CtaSection, FaqSection, FeaturesSection, HeroSection, HowItWorksSection,
    OptionalSections, PricingSection, Seo, TestimonialsSection,
};
use crate::errors::AppError;

/// Client for the Strapi v4 REST API.
#[derive(Clone)]
pub struct StrapiClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl StrapiClient {
    /// Creates a new `StrapiClient`. A trailing slash on `base_url` is ignored.
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Strapi client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Fetches the first published entry of a collection type.
    ///
    /// `populate` names the relations to expand; `active_only` adds the
    /// `isActive = true` filter.
    pub async fn find_first<T: DeserializeOwned>(
        &self,
        content_type: &str,
        populate: &[&str],
        active_only: bool,
    ) -> Result<Option<T>, AppError> {
        let url = format!("{}/api/{}", self.base_url, content_type);
        tracing::debug!("Fetching {} from Strapi", content_type);

        let mut query: Vec<(&str, String)> = vec![("publicationState", "live".to_string())];
        if !populate.is_empty() {
            query.push(("populate", populate.join(",")));
        }
        if active_only {
            query.push(("filters[isActive][$eq]", "true".to_string()));
        }

        let mut request = self.client.get(&url).query(&query);
        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Strapi request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Strapi returned {} for {}: {}",
                status, content_type, error_text
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Strapi response: {}", e))
        })?;

        let first = match flatten_entities(body) {
            Value::Array(items) => items.into_iter().next(),
            Value::Null => None,
            single => Some(single),
        };

        first
            .map(|item| {
                serde_json::from_value(item).map_err(|e| {
                    AppError::ExternalApiError(format!(
                        "Unexpected Strapi shape for {}: {}",
                        content_type, e
                    ))
                })
            })
            .transpose()
    }

    async fn section<T: DeserializeOwned>(
        &self,
        content_type: &str,
        populate: &[&str],
        active_only: bool,
    ) -> Option<T> {
        match self.find_first(content_type, populate, active_only).await {
            Ok(section) => section,
            Err(e) => {
                tracing::warn!("Error fetching {} from Strapi: {}", content_type, e);
                None
            }
        }
    }
}

#[async_trait]
impl ContentProvider for StrapiClient {
    fn name(&self) -> &'static str {
        "strapi"
    }

    async fn fetch_all(&self) -> Result<Option<CmsContent>, AppError> {
        let (hero, features, testimonials, how_it_works, pricing, faq, cta, seo) = tokio::join!(
            self.find_first::<HeroSection>("hero-sections", &["backgroundImage", "images"], true),
            self.section::<FeaturesSection>("features-sections", &["features"], true),
            self.section::<TestimonialsSection>(
                "testimonials-sections",
                &["testimonials", "testimonials.avatar"],
                true
            ),
            self.section::<HowItWorksSection>(
                "how-it-works-sections",
                &["steps", "steps.image"],
                true
            ),
            self.section::<PricingSection>("pricing-sections", &["plans"], true),
            self.section::<FaqSection>("faq-sections", &["faqs"], true),
            self.section::<CtaSection>("cta-sections", &["backgroundImage"], true),
            self.section::<Seo>("seos", &["ogImage", "twitterImage"], false),
        );

        let Some(hero) = hero? else {
            tracing::warn!("Hero section not found in Strapi");
            return Ok(None);
        };

        Ok(Some(CmsContent::assemble(
            hero,
            OptionalSections {
                features,
                testimonials,
                how_it_works,
                pricing,
                faq,
                cta,
                seo,
            },
        )))
    }
}

/// Unwraps Strapi v4 envelopes into plain objects.
///
/// `{data: X, meta?}` becomes `X`, `{id, attributes: {..}}` becomes the
/// attributes with the id merged in as a string, and null-valued fields are
/// dropped so they read as missing.
pub fn flatten_entities(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            let is_envelope =
                map.contains_key("data") && map.keys().all(|k| k == "data" || k == "meta");
            if is_envelope {
                return flatten_entities(map.remove("data").unwrap_or(Value::Null));
            }

            if let Some(Value::Object(attributes)) = map.remove("attributes") {
                let mut flat = Map::new();
                if let Some(id) = map.remove("id") {
                    flat.insert("id".to_string(), id_to_string(id));
                }
                for (key, inner) in attributes {
                    let inner = flatten_entities(inner);
                    if !inner.is_null() {
                        flat.insert(key, inner);
                    }
                }
                return Value::Object(flat);
            }

            let flat: Map<String, Value> = map
                .into_iter()
                .map(|(key, inner)| {
                    let inner = flatten_entities(inner);
                    if key == "id" {
                        (key, id_to_string(inner))
                    } else {
                        (key, inner)
                    }
                })
                .filter(|(_, inner)| !inner.is_null())
                .collect();
            Value::Object(flat)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(flatten_entities).collect()),
        other => other,
    }
}

fn id_to_string(id: Value) -> Value {
    match id {
        Value::Number(n) => Value::String(n.to_string()),
        other => other,
    }
}
