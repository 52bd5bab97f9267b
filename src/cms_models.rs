//! Internal shape of the landing-page content, independent of the upstream CMS.
//!
//! Deserialization is lenient: missing fields take their defaults so a sparse
//! provider payload still produces a usable section.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Identity and timestamps common to every CMS entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityMeta {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaFormat {
    pub name: String,
    pub hash: String,
    pub ext: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFormats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<MediaFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small: Option<MediaFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<MediaFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large: Option<MediaFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Media {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<MediaFormats>,
    pub hash: String,
    pub ext: String,
    pub mime: String,
    pub size: f64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconType {
    #[default]
    Lucide,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeroSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub subtitle: String,
    pub cta_text: String,
    pub cta_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<Media>,
    pub images: Vec<Media>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Feature {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub icon_type: IconType,
    pub order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeaturesSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub features: Vec<Feature>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Testimonial {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub content: String,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Media>,
    pub is_featured: bool,
    pub order: i64,
    pub is_active: bool,
}

impl Default for Testimonial {
    fn default() -> Self {
        Self {
            meta: EntityMeta::default(),
            name: String::new(),
            role: String::new(),
            company: None,
            content: String::new(),
            rating: 5,
            avatar: None,
            is_featured: false,
            order: 0,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestimonialsSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub testimonials: Vec<Testimonial>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HowItWorksStep {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub icon_type: IconType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Media>,
    pub order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HowItWorksSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub steps: Vec<HowItWorksStep>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub interval: BillingInterval,
    pub features: Vec<String>,
    pub cta_text: String,
    pub cta_link: String,
    pub is_popular: bool,
    pub is_active: bool,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            meta: EntityMeta::default(),
            name: String::new(),
            description: String::new(),
            price: 0.0,
            currency: "BRL".to_string(),
            interval: BillingInterval::Monthly,
            features: Vec::new(),
            cta_text: String::new(),
            cta_link: String::new(),
            is_popular: false,
            is_active: true,
            order: 0,
            badge: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub plans: Vec<Plan>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Faq {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaqSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub faqs: Vec<Faq>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtaSection {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub cta_text: String,
    pub cta_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<Media>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Seo {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub og_image: Option<Media>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_image: Option<Media>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    pub noindex: bool,
    pub nofollow: bool,
}

impl Seo {
    /// Used when the CMS has no SEO entry.
    pub fn fallback() -> Self {
        Self {
            title: "StuudIA - Fotos Profissionais com IA".to_string(),
            description:
                "Transforme suas fotos de produto em imagens profissionais com Inteligência Artificial"
                    .to_string(),
            keywords: vec![
                "fotos profissionais".to_string(),
                "IA".to_string(),
                "modelo virtual".to_string(),
            ],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
}

/// Site-wide settings. Not managed in the CMS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub site_name: String,
    pub site_description: String,
    pub contact_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    pub social_links: SocialLinks,
}

impl GlobalSettings {
    pub fn stuudia() -> Self {
        Self {
            site_name: "StuudIA".to_string(),
            site_description:
                "Transforme fotos de celular em ensaios profissionais de estúdio com modelo IA"
                    .to_string(),
            contact_email: "suporte@studia.com.br".to_string(),
            contact_phone: Some("+5562999999999".to_string()),
            social_links: SocialLinks {
                instagram: Some("https://instagram.com/appstuudia".to_string()),
                facebook: Some("https://facebook.com/profile.php?id=61582139489466".to_string()),
                twitter: None,
                linkedin: None,
            },
        }
    }
}

/// Everything the landing page renders, as one cached aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsContent {
    pub hero: HeroSection,
    pub features: FeaturesSection,
    pub testimonials: TestimonialsSection,
    pub how_it_works: HowItWorksSection,
    pub pricing: PricingSection,
    pub faq: FaqSection,
    pub cta: CtaSection,
    pub seo: Seo,
    pub global: GlobalSettings,
}

/// Sections other than the hero. Each may be missing upstream.
#[derive(Debug, Clone, Default)]
pub struct OptionalSections {
    pub features: Option<FeaturesSection>,
    pub testimonials: Option<TestimonialsSection>,
    pub how_it_works: Option<HowItWorksSection>,
    pub pricing: Option<PricingSection>,
    pub faq: Option<FaqSection>,
    pub cta: Option<CtaSection>,
    pub seo: Option<Seo>,
}

/// Empty-but-valid replacement for a missing section.
fn inert<T: Default>(section: Option<T>, deactivate: impl FnOnce(&mut T)) -> T {
    section.unwrap_or_else(|| {
        let mut empty = T::default();
        deactivate(&mut empty);
        empty
    })
}

impl CmsContent {
    /// Builds the aggregate around a hero section, filling missing sections
    /// with inactive defaults and ordering list members by `order`.
    pub fn assemble(hero: HeroSection, sections: OptionalSections) -> Self {
        let mut content = CmsContent {
            hero,
            features: inert(sections.features, |s| s.is_active = false),
            testimonials: inert(sections.testimonials, |s| s.is_active = false),
            how_it_works: inert(sections.how_it_works, |s| s.is_active = false),
            pricing: inert(sections.pricing, |s| s.is_active = false),
            faq: inert(sections.faq, |s| s.is_active = false),
            cta: inert(sections.cta, |s| s.is_active = false),
            seo: sections.seo.unwrap_or_else(Seo::fallback),
            global: GlobalSettings::stuudia(),
        };
        content.sort_members();
        content
    }

    // sort_by_key is stable: equal `order` keeps provider order
    fn sort_members(&mut self) {
        self.features.features.sort_by_key(|f| f.order);
        self.testimonials.testimonials.sort_by_key(|t| t.order);
        self.how_it_works.steps.sort_by_key(|s| s.order);
        self.pricing.plans.sort_by_key(|p| p.order);
        self.faq.faqs.sort_by_key(|f| f.order);
    }
}
