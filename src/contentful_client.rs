use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::cms::ContentProvider;
use crate::cms_models::{
    BillingInterval, CmsContent, CtaSection, EntityMeta, Faq, FaqSection, Feature,
    FeaturesSection, HeroSection, HowItWorksSection, HowItWorksStep, IconType, Media,
    MediaFormat, MediaFormats, OptionalSections, Plan, PricingSection, Seo, Testimonial,
    TestimonialsSection,
};
use crate::errors::AppError;

pub const DEFAULT_BASE_URL: &str = "https://cdn.contentful.com";

// Links nested deeper than this are left unresolved
const MAX_LINK_DEPTH: usize = 3;

/// Client for the Contentful Content Delivery API.
#[derive(Clone)]
pub struct ContentfulClient {
    client: reqwest::Client,
    base_url: String,
    space_id: String,
    access_token: String,
    environment: String,
}

impl ContentfulClient {
    pub fn new(
        base_url: &str,
        space_id: String,
        access_token: String,
        environment: String,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Contentful client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            space_id,
            access_token,
            environment,
        })
    }

    /// Fetches the first entry of `content_type` with its links resolved.
    pub async fn first_entry(
        &self,
        content_type: &str,
        include: u8,
    ) -> Result<Option<Value>, AppError> {
        let url = format!(
            "{}/spaces/{}/environments/{}/entries",
            self.base_url, self.space_id, self.environment
        );
        tracing::debug!("Fetching {} from Contentful", content_type);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .query(&[
                ("content_type", content_type.to_string()),
                ("limit", "1".to_string()),
                ("include", include.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Contentful request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Contentful returned {} for {}: {}",
                status, content_type, error_text
            )));
        }

        let mut body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Contentful response: {}", e))
        })?;

        let includes = Includes::from_response(&body);
        let first = body
            .get_mut("items")
            .and_then(Value::as_array_mut)
            .filter(|items| !items.is_empty())
            .map(|items| items.swap_remove(0));

        Ok(first.map(|entry| includes.resolve(entry, MAX_LINK_DEPTH)))
    }

    async fn section<T>(&self, content_type: &str, include: u8, transform: fn(&Value) -> T) -> Option<T> {
        match self.first_entry(content_type, include).await {
            Ok(entry) => entry.as_ref().map(transform),
            Err(e) => {
                tracing::warn!("Error fetching {} from Contentful: {}", content_type, e);
                None
            }
        }
    }
}

#[async_trait]
impl ContentProvider for ContentfulClient {
    fn name(&self) -> &'static str {
        "contentful"
    }

    async fn fetch_all(&self) -> Result<Option<CmsContent>, AppError> {
        let (hero, features, testimonials, how_it_works, pricing, faq, cta, seo) = tokio::join!(
            self.first_entry("heroSection", 2),
            self.section("featuresSection", 2, transform_features_section),
            self.section("testimonialsSection", 2, transform_testimonials_section),
            self.section("howItWorksSection", 2, transform_how_it_works_section),
            self.section("pricingSection", 2, transform_pricing_section),
            self.section("faqSection", 2, transform_faq_section),
            self.section("ctaSection", 1, transform_cta_section),
            self.section("seo", 1, transform_seo),
        );

        let Some(hero) = hero? else {
            tracing::warn!("Hero section not found in Contentful");
            return Ok(None);
        };

        Ok(Some(CmsContent::assemble(
            transform_hero_section(&hero),
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

/// Linked entries and assets delivered alongside the items.
struct Includes {
    entries: HashMap<String, Value>,
    assets: HashMap<String, Value>,
}

impl Includes {
    fn from_response(body: &Value) -> Self {
        let index = |kind: &str| -> HashMap<String, Value> {
            body.get("includes")
                .and_then(|inc| inc.get(kind))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let id = item.pointer("/sys/id")?.as_str()?;
                            Some((id.to_string(), item.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            entries: index("Entry"),
            assets: index("Asset"),
        }
    }

    /// Replaces `{sys: {type: "Link"}}` objects with the linked item.
    /// Unresolvable links become null and are dropped from arrays.
    fn resolve(&self, value: Value, depth: usize) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(target) = self.link_target(&map) {
                    return match target {
                        Some(found) if depth > 0 => self.resolve(found.clone(), depth - 1),
                        _ => Value::Null,
                    };
                }
                Value::Object(
                    map.into_iter()
                        .map(|(key, inner)| (key, self.resolve(inner, depth)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.resolve(item, depth))
                    .filter(|item| !item.is_null())
                    .collect(),
            ),
            other => other,
        }
    }

    /// `None` when `map` is not a link, `Some(None)` for a dangling link.
    fn link_target(&self, map: &Map<String, Value>) -> Option<Option<&Value>> {
        let sys = map.get("sys")?;
        if sys.get("type").and_then(Value::as_str) != Some("Link") {
            return None;
        }
        let id = sys.get("id").and_then(Value::as_str).unwrap_or_default();
        let target = match sys.get("linkType").and_then(Value::as_str) {
            Some("Asset") => self.assets.get(id),
            Some("Entry") => self.entries.get(id),
            _ => None,
        };
        Some(target)
    }
}

// ============ Field transforms ============

fn fields(entry: &Value) -> &Value {
    entry.get("fields").unwrap_or(&Value::Null)
}

fn text(fields: &Value, key: &str) -> String {
    opt_text(fields, key).unwrap_or_default()
}

fn opt_text(fields: &Value, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int(fields: &Value, key: &str) -> i64 {
    fields
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn flag(fields: &Value, key: &str) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(false)
}

// Active unless explicitly disabled
fn active(fields: &Value) -> bool {
    fields.get("isActive").and_then(Value::as_bool) != Some(false)
}

fn icon_type(fields: &Value) -> IconType {
    match fields.get("iconType").and_then(Value::as_str) {
        Some("custom") => IconType::Custom,
        _ => IconType::Lucide,
    }
}

fn meta(entry: &Value) -> EntityMeta {
    let sys = entry.get("sys").unwrap_or(&Value::Null);
    EntityMeta {
        id: text(sys, "id"),
        created_at: text(sys, "createdAt"),
        updated_at: text(sys, "updatedAt"),
        published_at: opt_text(sys, "publishedAt"),
    }
}

fn list<T>(fields: &Value, key: &str, transform: fn(&Value) -> T) -> Vec<T> {
    fields
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().map(transform).collect())
        .unwrap_or_default()
}

fn media_field(fields: &Value, key: &str) -> Option<Media> {
    fields.get(key).and_then(transform_media)
}

fn media_list(fields: &Value, key: &str) -> Vec<Media> {
    fields
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(transform_media).collect())
        .unwrap_or_default()
}

fn sized_format(name: &str, mime: &str, url: &str, edge: u32) -> MediaFormat {
    MediaFormat {
        name: name.to_string(),
        mime: mime.to_string(),
        width: edge,
        height: edge,
        url: format!("https:{}?w={}&h={}&fit=thumb", url, edge, edge),
        ..Default::default()
    }
}

/// Asset to media. Assets without a file URL are skipped.
pub fn transform_media(asset: &Value) -> Option<Media> {
    let f = fields(asset);
    let file = f.get("file")?;
    let url = file.get("url")?.as_str()?;
    let mime = text(file, "contentType");
    let image = file.pointer("/details/image");
    let dimension = |key: &str| {
        image
            .and_then(|img| img.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    };

    let formats = image.map(|_| MediaFormats {
        thumbnail: Some(sized_format("thumbnail", &mime, url, 150)),
        small: Some(sized_format("small", &mime, url, 400)),
        medium: Some(sized_format("medium", &mime, url, 800)),
        large: Some(sized_format("large", &mime, url, 1200)),
    });

    Some(Media {
        meta: meta(asset),
        name: text(f, "title"),
        alternative_text: opt_text(f, "description"),
        caption: opt_text(f, "description"),
        width: dimension("width"),
        height: dimension("height"),
        formats,
        hash: String::new(),
        ext: url.rsplit('.').next().unwrap_or_default().to_string(),
        mime,
        size: file
            .pointer("/details/size")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        url: format!("https:{}", url),
        preview_url: None,
        provider: "contentful".to_string(),
    })
}

pub fn transform_hero_section(entry: &Value) -> HeroSection {
    let f = fields(entry);
    HeroSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: text(f, "subtitle"),
        cta_text: text(f, "ctaText"),
        cta_link: text(f, "ctaLink"),
        background_image: media_field(f, "backgroundImage"),
        images: media_list(f, "images"),
        is_active: active(f),
        seo_title: opt_text(f, "seoTitle"),
        seo_description: opt_text(f, "seoDescription"),
    }
}

fn transform_feature(entry: &Value) -> Feature {
    let f = fields(entry);
    Feature {
        meta: meta(entry),
        title: text(f, "title"),
        description: text(f, "description"),
        icon: text(f, "icon"),
        icon_type: icon_type(f),
        order: int(f, "order"),
        is_active: active(f),
    }
}

fn transform_features_section(entry: &Value) -> FeaturesSection {
    let f = fields(entry);
    FeaturesSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        features: list(f, "features", transform_feature),
        is_active: active(f),
    }
}

fn transform_testimonial(entry: &Value) -> Testimonial {
    let f = fields(entry);
    let rating = match int(f, "rating") {
        0 => 5,
        r => r.clamp(1, 5) as u8,
    };
    Testimonial {
        meta: meta(entry),
        name: text(f, "name"),
        role: text(f, "role"),
        company: opt_text(f, "company"),
        content: text(f, "content"),
        rating,
        avatar: media_field(f, "avatar"),
        is_featured: flag(f, "isFeatured"),
        order: int(f, "order"),
        is_active: active(f),
    }
}

fn transform_testimonials_section(entry: &Value) -> TestimonialsSection {
    let f = fields(entry);
    TestimonialsSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        testimonials: list(f, "testimonials", transform_testimonial),
        is_active: active(f),
    }
}

fn transform_step(entry: &Value) -> HowItWorksStep {
    let f = fields(entry);
    HowItWorksStep {
        meta: meta(entry),
        title: text(f, "title"),
        description: text(f, "description"),
        icon: text(f, "icon"),
        icon_type: icon_type(f),
        image: media_field(f, "image"),
        order: int(f, "order"),
        is_active: active(f),
    }
}

fn transform_how_it_works_section(entry: &Value) -> HowItWorksSection {
    let f = fields(entry);
    HowItWorksSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        steps: list(f, "steps", transform_step),
        is_active: active(f),
    }
}

fn transform_plan(entry: &Value) -> Plan {
    let f = fields(entry);
    Plan {
        meta: meta(entry),
        name: text(f, "name"),
        description: text(f, "description"),
        price: f.get("price").and_then(Value::as_f64).unwrap_or(0.0),
        currency: opt_text(f, "currency").unwrap_or_else(|| "BRL".to_string()),
        interval: match f.get("interval").and_then(Value::as_str) {
            Some("yearly") => BillingInterval::Yearly,
            _ => BillingInterval::Monthly,
        },
        features: f
            .get("features")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        cta_text: text(f, "ctaText"),
        cta_link: text(f, "ctaLink"),
        is_popular: flag(f, "isPopular"),
        is_active: active(f),
        order: int(f, "order"),
        badge: opt_text(f, "badge"),
    }
}

fn transform_pricing_section(entry: &Value) -> PricingSection {
    let f = fields(entry);
    PricingSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        plans: list(f, "plans", transform_plan),
        is_active: active(f),
    }
}

fn transform_faq(entry: &Value) -> Faq {
    let f = fields(entry);
    Faq {
        meta: meta(entry),
        question: text(f, "question"),
        answer: text(f, "answer"),
        category: opt_text(f, "category"),
        order: int(f, "order"),
        is_active: active(f),
    }
}

fn transform_faq_section(entry: &Value) -> FaqSection {
    let f = fields(entry);
    FaqSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        faqs: list(f, "faqs", transform_faq),
        is_active: active(f),
    }
}

fn transform_cta_section(entry: &Value) -> CtaSection {
    let f = fields(entry);
    CtaSection {
        meta: meta(entry),
        title: text(f, "title"),
        subtitle: opt_text(f, "subtitle"),
        cta_text: text(f, "ctaText"),
        cta_link: text(f, "ctaLink"),
        background_image: media_field(f, "backgroundImage"),
        is_active: active(f),
    }
}

fn transform_seo(entry: &Value) -> Seo {
    let f = fields(entry);
    Seo {
        title: text(f, "title"),
        description: text(f, "description"),
        keywords: f
            .get("keywords")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        og_image: media_field(f, "ogImage"),
        twitter_image: media_field(f, "twitterImage"),
        canonical_url: opt_text(f, "canonicalUrl"),
        noindex: flag(f, "noindex"),
        nofollow: flag(f, "nofollow"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset() -> Value {
        json!({
            "sys": {"id": "img1", "createdAt": "2025-01-01T00:00:00Z", "updatedAt": "2025-01-02T00:00:00Z"},
            "fields": {
                "title": "Modelo",
                "file": {
                    "url": "//images.ctfassets.net/x/model.jpg",
                    "contentType": "image/jpeg",
                    "details": {"size": 2048, "image": {"width": 1600, "height": 900}}
                }
            }
        })
    }

    #[test]
    fn test_transform_media_prefixes_scheme() {
        let media = transform_media(&asset()).unwrap();
        assert_eq!(media.url, "https://images.ctfassets.net/x/model.jpg");
        assert_eq!(media.ext, "jpg");
        assert_eq!(media.width, 1600);
        let thumb = media.formats.unwrap().thumbnail.unwrap();
        assert_eq!(
            thumb.url,
            "https://images.ctfassets.net/x/model.jpg?w=150&h=150&fit=thumb"
        );
    }

    #[test]
    fn test_media_without_file_is_skipped() {
        assert!(transform_media(&json!({"sys": {"id": "x"}, "fields": {}})).is_none());
    }

    #[test]
    fn test_links_resolve_through_includes() {
        let body = json!({
            "items": [],
            "includes": {
                "Asset": [asset()],
                "Entry": [{"sys": {"id": "f1"}, "fields": {"title": "IA", "order": 1}}]
            }
        });
        let includes = Includes::from_response(&body);

        let entry = json!({
            "sys": {"id": "hero"},
            "fields": {
                "title": "Hero",
                "images": [
                    {"sys": {"type": "Link", "linkType": "Asset", "id": "img1"}},
                    {"sys": {"type": "Link", "linkType": "Asset", "id": "missing"}}
                ],
                "features": [{"sys": {"type": "Link", "linkType": "Entry", "id": "f1"}}]
            }
        });
        let resolved = includes.resolve(entry, MAX_LINK_DEPTH);

        let hero = transform_hero_section(&resolved);
        assert_eq!(hero.images.len(), 1);
        assert!(hero.is_active);
        assert_eq!(resolved["fields"]["features"][0]["fields"]["title"], "IA");
    }

    #[test]
    fn test_is_active_only_false_when_explicit() {
        let entry = json!({"sys": {"id": "s"}, "fields": {"title": "FAQ", "isActive": false, "faqs": [
            {"sys": {"id": "q"}, "fields": {"question": "?", "answer": "!"}}
        ]}});
        let section = transform_faq_section(&entry);
        assert!(!section.is_active);
        assert!(section.faqs[0].is_active);
    }

    #[test]
    fn test_testimonial_rating_defaults_to_five() {
        let t = transform_testimonial(&json!({"sys": {"id": "t"}, "fields": {"name": "Ana"}}));
        assert_eq!(t.rating, 5);
    }
}
