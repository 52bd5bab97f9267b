//! Landing-page lead capture and CMS content API.
//!
//! # Modules
//!
//! - `security`, `validation`: input sanitization, heuristics and schemas.
//! - `rate_limit`: per-client fixed-window throttling.
//! - `cache`, `cache_validator`: content cache backends and warm-up.
//! - `cms`, `cms_models`, `strapi_client`, `contentful_client`: landing-page content.
//! - `lead_repository`, `identity_client`, `db`: lead storage.
//! - `token`, `email_client`: sign-up links and welcome emails.
//! - `lead_capture`: request flows for the lead endpoints.
//! - `handlers`, `docs`: HTTP surface and OpenAPI document.

pub mod cache;
pub mod cache_validator;
pub mod clock;
pub mod cms;
pub mod cms_models;
pub mod config;
pub mod contentful_client;
pub mod db;
pub mod docs;
pub mod email_client;
pub mod errors;
pub mod handlers;
pub mod identity_client;
pub mod lead_capture;
pub mod lead_repository;
pub mod models;
pub mod rate_limit;
pub mod security;
pub mod strapi_client;
pub mod token;
pub mod validation;
