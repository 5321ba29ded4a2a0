use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use cadence::cli::{Cli, Command};
use cadence::config::CadenceConfig;
use cadence::error::CadenceError;
use cadence::session::SessionManager;
use cadence::store::FileStore;
use cadence::{demo, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CadenceConfig::load()?;
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    match cli.command {
        Command::Cycle { scope } => {
            if let Some(scope) = scope {
                config.scope = scope;
            }
            let channel = demo::channel_from_config(&config);
            demo::run(&config, 12, channel, cli.verbose).await?;
        }
        Command::Status => {
            let sessions = SessionManager::new(Arc::new(FileStore::new(&config.data_dir)));
            match sessions.latest()? {
                Some(session) => ui::print_session_summary(&session),
                None => return Err(CadenceError::NoSession.into()),
            }
        }
        Command::Cleanup { days } => {
            let sessions = SessionManager::new(Arc::new(FileStore::new(&config.data_dir)))
                .with_archive_on_complete(config.archive_on_complete);
            let days = days.unwrap_or(config.retention_days);
            let processed = sessions.cleanup(days)?;
            println!("retired {processed} session(s) older than {days} day(s)");
        }
        Command::Demo { accounts } => {
            demo::run_demo(&config, accounts, cli.verbose).await?;
        }
    }

    Ok(())
}
