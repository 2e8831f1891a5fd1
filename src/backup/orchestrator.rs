use crate::backup::archive::Archiver;
use crate::backup::backup_config::{BackupConfig, DeliveryPolicy};
use crate::backup::dump::Dumper;
use crate::backup::lock::RunLock;
use crate::backup::notifications::Notifier;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::retention::RetentionManager;
use crate::backup::{FILE_PREFIX, FILE_TIME_FORMAT};
use chrono::{DateTime, Local};
use derive_more::Display;
use getset::{CopyGetters, Getters};
use lettre::message::Mailbox;
use std::path::PathBuf;

/// Position of a run in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("idle")]
    Idle,
    #[display("locking")]
    Locking,
    #[display("dump")]
    Dumping,
    #[display("archive")]
    Archiving,
    #[display("notification")]
    Notifying,
    #[display("cleanup")]
    Cleaning,
    #[display("done")]
    Done,
    #[display("failed")]
    Failed,
}

/// Outcome of a single run, reported once the run reached `Done` or `Failed`
#[derive(Debug, Getters, CopyGetters)]
pub struct BackupResult {
    #[getset(get_copy = "pub")]
    stage: Stage,
    /// Stage that was executing when the run failed
    #[getset(get_copy = "pub")]
    failed_stage: Option<Stage>,
    #[getset(get = "pub")]
    error: Option<Error>,
    /// Problems that did not fail the run
    #[getset(get = "pub")]
    warnings: Option<Error>,
    /// Archive left on disk, if any
    #[getset(get = "pub")]
    archive: Option<PathBuf>,
    #[getset(get = "pub")]
    delivered: Vec<Mailbox>,
    #[getset(get = "pub")]
    undelivered: Vec<Mailbox>,
}

impl BackupResult {
    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn message(&self) -> String {
        match (&self.failed_stage, &self.error) {
            (Some(stage), Some(e)) => format!("Backup failed during {stage} stage:\n{e}"),
            _ => match &self.archive {
                Some(path) => format!(
                    "Backup ZIP created and emailed to {} recipient(s), kept at {:?}.",
                    self.delivered.len(),
                    path
                ),
                None => format!(
                    "Backup ZIP created and emailed to {} recipient(s).",
                    self.delivered.len()
                ),
            },
        }
    }
}

#[derive(Default)]
struct Progress {
    stage: Option<Stage>,
    archive: Option<PathBuf>,
    delivered: Vec<Mailbox>,
    undelivered: Vec<Mailbox>,
    warnings: Vec<Error>,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        tracing::debug!("Entering {stage} stage");
        self.stage = Some(stage);
    }
}

/// Drives one backup run: dump, archive, deliver, then clean up
///
/// Stages execute strictly in order and the first fatal error stops the run.
/// Whatever artifact exists when the run stops stays on disk.
pub struct BackupOrchestrator<'c, D: Dumper, N: Notifier> {
    config: &'c BackupConfig,
    dumper: D,
    notifier: N,
    archiver: Archiver,
    retention: RetentionManager,
}

impl<'c, D: Dumper, N: Notifier> BackupOrchestrator<'c, D, N> {
    pub fn new(config: &'c BackupConfig, dumper: D, notifier: N) -> Result<Self> {
        let backup = config.backup();
        Ok(Self {
            config,
            dumper,
            notifier,
            archiver: Archiver::new(config.resolved_base_dir()?),
            retention: RetentionManager::new(
                backup.path(),
                backup.keep_local(),
                backup.max_age(),
            ),
        })
    }

    pub fn run(&self) -> BackupResult {
        self.run_at(Local::now())
    }

    /// Runs every stage, naming artifacts after `now`.
    pub fn run_at(&self, now: DateTime<Local>) -> BackupResult {
        let mut progress = Progress::default();
        progress.enter(Stage::Idle);

        let res = self.execute(now, &mut progress);
        let warnings = convert_error_vec(progress.warnings).err();

        match res {
            Ok(kept) => {
                tracing::info!("Backup run finished");
                BackupResult {
                    stage: Stage::Done,
                    failed_stage: None,
                    error: None,
                    warnings,
                    archive: kept,
                    delivered: progress.delivered,
                    undelivered: progress.undelivered,
                }
            }
            Err(e) => {
                let failed_stage = progress.stage.unwrap_or(Stage::Idle);
                tracing::error!("Backup run failed during {failed_stage} stage");
                BackupResult {
                    stage: Stage::Failed,
                    failed_stage: Some(failed_stage),
                    error: Some(e),
                    warnings,
                    archive: progress.archive.filter(|p| p.exists()),
                    delivered: progress.delivered,
                    undelivered: progress.undelivered,
                }
            }
        }
    }

    fn execute(&self, now: DateTime<Local>, progress: &mut Progress) -> Result<Option<PathBuf>> {
        let backup = self.config.backup();
        let time_string = now.format(FILE_TIME_FORMAT).to_string();
        let dump_path = backup.path().join(format!("{FILE_PREFIX}{time_string}.sql"));
        let archive_path = backup.path().join(format!("{FILE_PREFIX}{time_string}.zip"));

        progress.enter(Stage::Locking);
        let _lock = RunLock::acquire(backup.path())?;

        progress.enter(Stage::Dumping);
        let dump = self
            .dumper
            .dump(&dump_path)
            .map_err(|e| as_stage_error(e, Stage::Dumping))?;
        if dump.size() == 0 {
            let mut e = Error::EmptyDump(dump.path().clone());
            if let Err(e2) = std::fs::remove_file(dump.path()) {
                e = e.chain(Error::from(e2).add_msg("Delete empty dump file failed."));
            }
            return Err(Error::dump_failed(e));
        }

        progress.enter(Stage::Archiving);
        let (archive, non_fatal) = self
            .archiver
            .archive(&dump, &archive_path, backup.include(), backup.zip_password().as_ref())
            .map_err(|e| as_stage_error(e, Stage::Archiving))?;
        if let Some(e) = non_fatal {
            tracing::warn!("Archive created with skipped entries:\n{e}");
            progress.warnings.push(e);
        }
        progress.archive = Some(archive.path().clone());

        progress.enter(Stage::Notifying);
        let subject = self.config.mail_subject(&now);
        let outcomes = self.notifier.notify(&archive, backup.recipients(), &subject);

        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(_) => progress.delivered.push(outcome.recipient),
                Err(e) => {
                    progress.undelivered.push(outcome.recipient);
                    failures.push(e);
                }
            }
        }
        let delivered_to_all = !progress.delivered.is_empty() && failures.is_empty();

        if !failures.is_empty() {
            let failures = Error::lots_of_error(failures).add_msg(format!(
                "Backup delivered to {} of {} recipient(s)",
                progress.delivered.len(),
                progress.delivered.len() + progress.undelivered.len()
            ));
            // best effort still needs at least one delivered copy
            let fatal = progress.delivered.is_empty()
                || backup.delivery_policy() == DeliveryPolicy::RequireAll;
            if fatal {
                return match self.retention.mark_undelivered(&archive) {
                    Ok(_) => Err(failures),
                    Err(e) => Err(failures.chain(e)),
                };
            }
            tracing::warn!("{failures}");
            progress.warnings.push(failures);
        } else if progress.delivered.is_empty() {
            return Err(Error::NoRecipients);
        }

        progress.enter(Stage::Cleaning);
        let kept = self.retention.apply(&archive, delivered_to_all)?;

        let (pruned, prune_error) = self.retention.prune(now);
        if !pruned.is_empty() {
            tracing::info!("Pruned {} old archive(s)", pruned.len());
        }
        if let Some(e) = prune_error {
            tracing::warn!("Pruning old archives failed:\n{e}");
            progress.warnings.push(e);
        }

        Ok(kept)
    }
}

/// Tags an error with the stage it came from, unless a component already did.
fn as_stage_error(error: Error, stage: Stage) -> Error {
    let tagged = matches!(
        error.root_kind(),
        Error::DumpFailed(_) | Error::ArchiveFailed(_)
    );
    match stage {
        _ if tagged => error,
        Stage::Dumping => Error::dump_failed(error),
        Stage::Archiving => Error::archive_failed(error),
        _ => error,
    }
}
