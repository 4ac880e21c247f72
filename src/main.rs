use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docketmail::config::AppConfig;
use docketmail::db::postgres::PgBackend;
use docketmail::email::reply::RegexReplyCleaner;
use docketmail::email::sender::{
    EmailTransport, Notifier, SendGridTransport, UnconfiguredTransport,
};
use docketmail::error::EmailError;
use docketmail::scheduler::ReminderScheduler;
use docketmail::server::{self, AppState};

#[derive(Parser)]
#[command(name = "docketmail", version, about = "Deadline and hearing email notifications")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and the scheduled reminder loop.
    Serve,
    /// Run one reminder sweep, print the summary as JSON, and exit.
    Remind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docketmail=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let db = Arc::new(PgBackend::new(&config.database).await?);
    let caps = db.probe_capabilities().await?;
    info!(?caps, "probed schema capabilities");

    let transport: Arc<dyn EmailTransport> = match SendGridTransport::from_config(&config.email) {
        Ok(transport) => Arc::new(transport),
        Err(EmailError::NotConfigured) => {
            warn!("SENDGRID_API_KEY not set, outbound email disabled");
            Arc::new(UnconfiguredTransport)
        }
        Err(err) => return Err(err.into()),
    };
    let notifier = Arc::new(Notifier::new(transport, config.email.clone()));
    let scheduler = Arc::new(ReminderScheduler::new(db.clone(), caps, notifier));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Remind => {
            let summary = scheduler.run().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                std::process::exit(1);
            }
        }
        Command::Serve => {
            let schedule = cron::Schedule::from_str(&config.reminder_cron)?;
            info!(cron = %config.reminder_cron, "starting reminder loop");
            let loop_scheduler = scheduler.clone();
            tokio::spawn(async move {
                loop {
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        warn!("reminder schedule has no upcoming ticks, loop stopped");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    let summary = loop_scheduler.run().await;
                    info!(
                        total_sent = summary.total_sent,
                        total_errors = summary.total_errors,
                        "scheduled reminder sweep done"
                    );
                }
            });

            let state = Arc::new(AppState {
                db,
                caps,
                cleaner: Arc::new(RegexReplyCleaner),
                scheduler,
                app_base_url: config.email.app_base_url.clone(),
            });
            let app = server::build_router(state, config.server.inbound_body_max_bytes);
            let addr = SocketAddr::new(config.server.host, config.server.port);
            server::serve(addr, app).await?;
        }
    }
    Ok(())
}
