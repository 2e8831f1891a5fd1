use clap::Parser;
use db_mail_backup::backup::backup_config::BackupConfig;
use db_mail_backup::backup::orchestrator::{BackupOrchestrator, BackupResult};
use db_mail_backup::backup::result_error::result::Result;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};

/// Dump a database, zip it and mail it to the configured recipients
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn run(config: &BackupConfig) -> Result<BackupResult> {
    let notifier = config.notification().build_notifier(config.mail_body())?;
    Ok(BackupOrchestrator::new(config, config.database(), notifier)?.run())
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = BackupConfig::from_yaml_file(&args.config).and_then(|config| run(&config));

    match res {
        Ok(result) => {
            if let Some(warnings) = result.warnings() {
                warn!("Backup finished with warnings:\n{warnings}");
            }
            if result.is_success() {
                info!("{}", result.message());
            } else {
                error!("{}", result.message());
            }
            exit(result.exit_code());
        }
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
