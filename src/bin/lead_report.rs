//! Prints the lead status tally, optionally listing the leads in one status.
//!
//! Usage: `lead-report [status]`

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;

use landing_leads_api::identity_client::NoIdentityStore;
use landing_leads_api::lead_repository::{LeadRepository, PgLeadStore};
use landing_leads_api::models::LeadStatus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    let repository = LeadRepository::new(Arc::new(PgLeadStore::new(pool)), Arc::new(NoIdentityStore));

    let stats = repository.get_lead_stats().await?;
    println!("Leads: {}", stats.total);
    println!("  pending:            {}", stats.pending);
    println!("  email_validated:    {}", stats.email_validated);
    println!("  whatsapp_validated: {}", stats.whatsapp_validated);
    println!("  converted:          {}", stats.converted);

    if let Some(raw) = env::args().nth(1) {
        let status: LeadStatus = raw.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        let leads = repository.get_leads_by_status(status).await?;
        println!();
        println!("{} lead(s) in {}:", leads.len(), status);
        for lead in leads {
            println!(
                "- {} {} <{}> origin={} created={}",
                lead.id,
                lead.name,
                lead.email,
                lead.origin,
                lead.created_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    Ok(())
}
