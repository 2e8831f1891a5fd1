//! # db-mail-backup
//!
//! One-shot database backup: dump, zip, email, clean up.
//!
//! ## Features
//!
//! - **Database Dump**: Runs `mysqldump` (or a compatible tool) without a shell
//! - **Archiving**: Bundles the dump and configured paths into one ZIP
//! - **Encryption**: Optional AES-256 for every archive entry
//! - **Delivery**: One SMTP message per recipient with the archive attached
//! - **Retention**: Delete after delivery or keep locally with age-based pruning
//!
//! ## Quick Start
//!
//! ```no_run
//! use db_mail_backup::backup::backup_config::BackupConfig;
//! use db_mail_backup::backup::orchestrator::BackupOrchestrator;
//!
//! let config = BackupConfig::from_yaml_file("config.yml")?;
//! let notifier = config.notification().build_notifier(config.mail_body())?;
//! let result = BackupOrchestrator::new(&config, config.database(), notifier)?.run();
//! std::process::exit(result.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
