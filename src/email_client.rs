use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::{EmailSendResult, WelcomeEmail};
use crate::token::TokenIssuer;

/// Rendered welcome email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Sends transactional emails. Implementations report failures in the
/// returned result and never error.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_welcome_email(&self, email: &WelcomeEmail) -> EmailSendResult;
}

/// Used when no email provider is configured.
pub struct DisabledEmail;

#[async_trait]
impl EmailDispatcher for DisabledEmail {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send_welcome_email(&self, email: &WelcomeEmail) -> EmailSendResult {
        tracing::warn!("Email provider not configured, skipping welcome email for lead {}", email.lead_id);
        EmailSendResult::failed("Email provider not configured")
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the welcome email for a freshly captured lead.
pub fn render_welcome_email(data: &WelcomeEmail, signup_link: &str, support_email: &str) -> EmailTemplate {
    let name = escape_html(&data.name);
    let email = escape_html(&data.email);
    let origin = escape_html(&data.origin);
    let link = escape_html(signup_link);
    let support = escape_html(support_email);

    let whatsapp_row = data
        .whatsapp
        .as_deref()
        .map(|w| {
            format!(
                r#"<tr><td style="color: #4a4a4a; font-size: 14px;"><strong>WhatsApp:</strong> {}</td></tr>"#,
                escape_html(w)
            )
        })
        .unwrap_or_default();

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Bem-vindo ao StuudIA</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; background-color: #f5f5f5;">
  <table width="100%" cellpadding="0" cellspacing="0" style="background-color: #f5f5f5; padding: 40px 20px;">
    <tr>
      <td align="center">
        <table width="600" cellpadding="0" cellspacing="0" style="background-color: #ffffff; border-radius: 16px; overflow: hidden;">
          <tr>
            <td style="background: linear-gradient(135deg, #121212 0%, #262626 100%); padding: 50px 40px; text-align: center;">
              <h1 style="margin: 0; color: #b8ff00; font-size: 32px; font-weight: 700;">StuudIA</h1>
              <p style="margin: 10px 0 0 0; color: #f2f2f2; font-size: 16px;">Crie imagens profissionais com IA</p>
            </td>
          </tr>
          <tr>
            <td style="padding: 50px 40px;">
              <h2 style="margin: 0 0 20px 0; color: #1a1a1a; font-size: 24px;">Bem-vindo, {name}</h2>
              <p style="margin: 0 0 16px 0; color: #4a4a4a; font-size: 16px; line-height: 1.6;">Recebemos seu cadastro e reservamos seu acesso ao StuudIA.</p>
              <p style="margin: 0 0 24px 0; color: #4a4a4a; font-size: 16px; line-height: 1.6;">Para começar, acesse pelo link abaixo. Se tiver dúvidas, basta responder este e-mail.</p>
              <table width="100%" cellpadding="0" cellspacing="0">
                <tr>
                  <td align="center" style="padding: 10px 0 30px 0;">
                    <a href="{link}" style="display: inline-block; background: #111111; color: #ffffff; text-decoration: none; padding: 12px 20px; border-radius: 8px; font-size: 16px; font-weight: 600;">Acessar seu cadastro</a>
                  </td>
                </tr>
              </table>
              <table width="100%" cellpadding="0" cellspacing="0" style="border-top: 2px solid #f0f0f0; padding-top: 30px; margin-top: 30px;">
                <tr>
                  <td>
                    <p style="margin: 0 0 15px 0; color: #6b7280; font-size: 14px; font-weight: 600; text-transform: uppercase;">Seus dados:</p>
                    <table width="100%" cellpadding="5" cellspacing="0">
                      <tr><td style="color: #4a4a4a; font-size: 14px;"><strong>Nome:</strong> {name}</td></tr>
                      <tr><td style="color: #4a4a4a; font-size: 14px;"><strong>Email:</strong> {email}</td></tr>
                      {whatsapp_row}
                      <tr><td style="color: #4a4a4a; font-size: 14px;"><strong>Origem:</strong> {origin}</td></tr>
                    </table>
                  </td>
                </tr>
              </table>
            </td>
          </tr>
          <tr>
            <td style="padding: 40px; text-align: center; border-top: 1px solid #e5e5e5;">
              <p style="margin: 0 0 15px 0; color: #1a1a1a; font-size: 16px; font-weight: 600;">Precisa de ajuda?</p>
              <p style="margin: 0 0 10px 0; color: #6b7280; font-size: 14px;">Responda este e-mail ou fale com a gente: <a href="mailto:{support}" style="color: #111111;">{support}</a></p>
              <p style="margin: 20px 0 0 0; color: #9ca3af; font-size: 12px; line-height: 1.5;">Este email foi enviado porque você se cadastrou em nossa landing page.<br>Se não foi você, pode ignorar este email.</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
    );

    let mut text = format!(
        "Olá, {}. Recebemos seu cadastro no StuudIA.\n\n\
         Acesse seu cadastro:\n{}\n\n\
         Se precisar de ajuda, basta responder este e-mail.\n\n\
         Dados:\n- Nome: {}\n- Email: {}\n",
        data.name, signup_link, data.name, data.email
    );
    if let Some(whatsapp) = &data.whatsapp {
        text.push_str(&format!("- WhatsApp: {}\n", whatsapp));
    }
    text.push_str(&format!(
        "- Origem: {}\n\n\
         Este email foi enviado porque você se cadastrou em nossa landing page.\n\
         Se não foi você, ignore este email.\n",
        data.origin
    ));

    EmailTemplate {
        subject: format!("Olá, {}. Seu acesso ao StuudIA", data.name),
        html,
        text,
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

/// Client for the Resend HTTP API.
#[derive(Clone)]
pub struct ResendEmailClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    sender: String,
    reply_to: String,
    signup_base_url: String,
    tokens: TokenIssuer,
}

impl ResendEmailClient {
    pub fn new(
        api_url: &str,
        api_key: String,
        sender_name: &str,
        from_email: &str,
        reply_to: String,
        signup_base_url: String,
        tokens: TokenIssuer,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Resend client: {}", e))
            })?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            sender: format!("{} <{}>", sender_name, from_email),
            reply_to,
            signup_base_url,
            tokens,
        })
    }

    /// Submits one email and returns the provider's message id.
    pub async fn deliver(&self, to: &str, template: &EmailTemplate) -> Result<Option<String>, AppError> {
        let url = format!("{}/emails", self.api_url);

        let body = json!({
            "from": self.sender,
            "to": [to],
            "subject": template.subject,
            "html": template.html,
            "text": template.text,
            "reply_to": self.reply_to,
            "headers": {
                "List-Unsubscribe": format!("<mailto:{}>", self.reply_to)
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Resend request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Resend returned {}: {}",
                status, error_text
            )));
        }

        let sent: SendResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Resend response: {}", e))
        })?;

        Ok(sent.id)
    }
}

#[async_trait]
impl EmailDispatcher for ResendEmailClient {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send_welcome_email(&self, email: &WelcomeEmail) -> EmailSendResult {
        let link = match self.tokens.generate_signup_link(
            &email.lead_id.to_string(),
            &email.email,
            &self.signup_base_url,
        ) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("Could not issue sign-up link for lead {}: {}", email.lead_id, e);
                return EmailSendResult::failed(e.to_string());
            }
        };

        let template = render_welcome_email(email, &link, &self.reply_to);
        match self.deliver(&email.email, &template).await {
            Ok(message_id) => {
                tracing::info!("Welcome email sent for lead {}", email.lead_id);
                EmailSendResult::sent(message_id)
            }
            Err(e) => {
                tracing::warn!("Welcome email failed for lead {}: {}", email.lead_id, e);
                EmailSendResult::failed(e.to_string())
            }
        }
    }
}
