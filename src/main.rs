//! leadflow: inbound-email ingestion and AI-draft pipeline.
//!
//! Commands:
//!   connect             run the OAuth consent flow and store the account
//!   accounts            list connected mailbox accounts
//!   disconnect <email>  deactivate an account (history kept)
//!   sync                run one on-demand pass over all active accounts
//!   daemon              run scheduled passes until stopped

use leadflow::ai::ChatCompletionsGenerator;
use leadflow::config::AppConfig;
use leadflow::db::CrmDb;
use leadflow::gmail::{auth, GmailClient};
use leadflow::scheduler::Scheduler;
use leadflow::services::credentials;
use leadflow::services::sync::{PassOptions, SyncCoordinator, SyncSummary};

fn print_usage() {
    eprintln!(
        "usage: leadflow <command>\n\n\
         commands:\n\
         \x20 connect             connect a mailbox via OAuth consent\n\
         \x20 accounts            list connected mailbox accounts\n\
         \x20 disconnect <email>  deactivate an account\n\
         \x20 sync                run one on-demand sync pass\n\
         \x20 daemon              run scheduled passes until stopped"
    );
}

fn print_summary(summary: &SyncSummary) {
    if summary.no_accounts() {
        println!("No mailbox accounts connected. Run `leadflow connect` first.");
        return;
    }
    println!(
        "Processed {}, skipped {} across {} account(s)",
        summary.processed,
        summary.skipped,
        summary.accounts.len()
    );
    for account in &summary.accounts {
        match &account.error {
            Some(error) => println!(
                "  {}: processed={} skipped={} error: {}",
                account.email, account.processed, account.skipped, error
            ),
            None => println!(
                "  {}: processed={} skipped={}",
                account.email, account.processed, account.skipped
            ),
        }
    }
}

async fn run(command: &str, args: &[String]) -> Result<(), String> {
    let config = AppConfig::load()?;

    match command {
        "connect" => {
            let connected = auth::run_consent_flow(&config.oauth)
                .await
                .map_err(|e| format!("Consent flow failed: {e}"))?;
            let db = CrmDb::open().map_err(|e| e.to_string())?;
            let account = credentials::connect_account(&db, &connected)?;
            println!("Connected mailbox {}", account.email);
            Ok(())
        }
        "accounts" => {
            let db = CrmDb::open().map_err(|e| e.to_string())?;
            let accounts = db.list_accounts().map_err(|e| e.to_string())?;
            if accounts.is_empty() {
                println!("No mailbox accounts connected.");
                return Ok(());
            }
            for account in accounts {
                let state = if account.is_active { "active" } else { "disconnected" };
                let last_sync = account.last_synced_at.as_deref().unwrap_or("never");
                println!("{}  [{}]  last sync: {}", account.email, state, last_sync);
            }
            Ok(())
        }
        "disconnect" => {
            let email = args
                .first()
                .ok_or_else(|| "usage: leadflow disconnect <email>".to_string())?;
            let db = CrmDb::open().map_err(|e| e.to_string())?;
            if credentials::disconnect_account(&db, email)? {
                println!("Disconnected {email}");
            } else {
                println!("No account found for {email}");
            }
            Ok(())
        }
        "sync" => {
            let db = CrmDb::open().map_err(|e| e.to_string())?;
            if let Some(email) = credentials::import_legacy_token(&db)? {
                log::info!("Imported legacy single-account token for {email}");
            }
            let mailbox =
                GmailClient::new(config.oauth.clone()).map_err(|e| e.to_string())?;
            let generator =
                ChatCompletionsGenerator::new(&config.generation).map_err(|e| e.to_string())?;
            let coordinator = SyncCoordinator::new(&db, &mailbox, &generator, &config);
            let summary = coordinator
                .run_pass(&PassOptions::on_demand())
                .await
                .map_err(|e| e.to_string())?;
            print_summary(&summary);
            Ok(())
        }
        "daemon" => {
            let db = CrmDb::open().map_err(|e| e.to_string())?;
            if let Some(email) = credentials::import_legacy_token(&db)? {
                log::info!("Imported legacy single-account token for {email}");
            }
            let mailbox =
                GmailClient::new(config.oauth.clone()).map_err(|e| e.to_string())?;
            let generator =
                ChatCompletionsGenerator::new(&config.generation).map_err(|e| e.to_string())?;
            let scheduler = Scheduler::new(&db, &mailbox, &generator, &config)?;
            scheduler.run().await;
            Ok(())
        }
        _ => {
            print_usage();
            Err(format!("unknown command '{command}'"))
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    if command == "help" || command == "--help" || command == "-h" {
        print_usage();
        return;
    }

    if let Err(e) = run(command, &args[2..]).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
