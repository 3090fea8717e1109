use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use mail_router::config::RouterConfig;
use mail_router::tenant::read_tenants_file;
use mail_router::{EmailMessage, EmailRouter, KeywordClassifier};

#[derive(Debug, Parser)]
#[command(
    name = "mail-router",
    about = "Route one email read from stdin and print the decision as JSON",
    after_help = "Examples:\n  mail-router tenants.json < email.json\n  mail-router --rfc822 tenants.json < message.eml"
)]
struct Cli {
    #[arg(long, help = "Read stdin as a raw RFC 822 message instead of JSON")]
    rfc822: bool,

    #[arg(env = "MAIL_ROUTER_TENANTS", help = "Tenant configuration file (JSON)")]
    tenants: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = RouterConfig::from_env()?;
    let tenants = read_tenants_file(&cli.tenants)
        .with_context(|| format!("failed to read tenants from {}", cli.tenants.display()))?;

    let router = EmailRouter::new(&config, Arc::new(KeywordClassifier::default()));
    let report = router.load_tenants(tenants)?;
    for (id, reasons) in &report.skipped {
        eprintln!("skipped tenant {id}: {}", reasons.join("; "));
    }

    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("failed to read email from stdin")?;

    let message = if cli.rfc822 {
        EmailMessage::from_rfc822(&raw).context("stdin is not a parsable RFC 822 message")?
    } else {
        serde_json::from_slice(&raw).context("stdin is not a JSON email message")?
    };

    let decision = router.route_email(&message).await?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
