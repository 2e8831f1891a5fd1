use crate::backup::archive::ArchiveArtifact;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::{FILE_PREFIX, FILE_TIME_FORMAT};
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone};
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::time::Duration;

static ARCHIVE_EXT: &str = ".zip";
static UNDELIVERED_EXT: &str = ".undelivered";

/// Decides what happens to the final archive once delivery is over
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct RetentionManager {
    #[getset(get = "pub")]
    backup_dir: PathBuf,
    #[getset(get_copy = "pub")]
    keep_local: bool,
    #[getset(get_copy = "pub")]
    max_age: Option<Duration>,
}

impl RetentionManager {
    pub fn new<P: Into<PathBuf>>(backup_dir: P, keep_local: bool, max_age: Option<Duration>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            keep_local,
            max_age,
        }
    }

    /// Returns the retained path, or `None` when the archive was deleted.
    ///
    /// An archive that did not reach every recipient is always kept and marked.
    pub fn apply(&self, archive: &ArchiveArtifact, delivered_to_all: bool) -> Result<Option<PathBuf>> {
        if !delivered_to_all {
            self.mark_undelivered(archive)?;
            return Ok(Some(archive.path().clone()));
        }

        if self.keep_local {
            tracing::info!("Keeping local archive {:?}", archive.path());
            return Ok(Some(archive.path().clone()));
        }

        std::fs::remove_file(archive.path())
            .map_err(Error::from)
            .add_msg(format!("Removing local archive {:?} failed", archive.path()))?;
        tracing::info!("Removed local archive {:?}", archive.path());
        Ok(None)
    }

    /// Writes `<archive>.undelivered` next to the archive so `prune` leaves it
    /// alone until an operator removes the marker.
    pub fn mark_undelivered(&self, archive: &ArchiveArtifact) -> Result<PathBuf> {
        let marker = undelivered_marker(archive.path());
        std::fs::write(&marker, b"")
            .map_err(Error::from)
            .add_msg(format!("Cannot mark {:?} as undelivered", archive.path()))?;
        tracing::warn!(
            "Keeping {:?} since it was not delivered to every recipient, marked by {:?}",
            archive.path(),
            marker
        );
        Ok(marker)
    }

    /// Deletes kept archives older than `max_age`, judged by the timestamp in
    /// their file name. Only applies when local archives are kept, and never
    /// touches archives marked undelivered.
    pub fn prune(&self, now: DateTime<Local>) -> (Vec<PathBuf>, Option<Error>) {
        let Some(max_age) = self.max_age.filter(|_| self.keep_local) else {
            return (vec![], None);
        };
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);

        let dir = match std::fs::read_dir(&self.backup_dir) {
            Ok(dir) => dir,
            Err(e) => {
                return (
                    vec![],
                    Some(Error::from(e).add_msg(format!("Cannot list {:?}", self.backup_dir))),
                )
            }
        };

        let (deleted, errors): (Vec<_>, Vec<_>) = dir
            .filter_map(|r| r.ok())
            .map(|r| r.path())
            .filter_map(|p| archive_time(&p).map(|dt| (p, dt)))
            .filter(|(_, dt)| now.signed_duration_since(*dt) > max_age)
            .filter(|(p, _)| {
                let undelivered = undelivered_marker(p).exists();
                if undelivered {
                    tracing::info!("Not pruning undelivered archive {:?}", p);
                }
                !undelivered
            })
            .sorted_by_key(|(_, dt)| *dt)
            .map(|(p, _)| {
                tracing::info!("Removing out of retention archive {:?}", p);
                std::fs::remove_file(&p)
                    .map(|_| p.clone())
                    .map_err(|e| Error::from(e).add_msg(format!("Removing {:?} failed", p)))
            })
            .partition_result();

        (deleted, convert_error_vec(errors).err())
    }
}

pub fn undelivered_marker<P: AsRef<Path>>(archive_path: P) -> PathBuf {
    let mut name = archive_path.as_ref().as_os_str().to_owned();
    name.push(UNDELIVERED_EXT);
    PathBuf::from(name)
}

/// Parses `backup_db_<YYYY-MM-DD_HH-MM-SS>.zip` back into a local date time.
pub fn archive_time<P: AsRef<Path>>(file_path: P) -> Option<DateTime<Local>> {
    let file_name = file_path.as_ref().file_name()?.to_str()?;
    let time_string = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(ARCHIVE_EXT)?;

    NaiveDateTime::parse_from_str(time_string, FILE_TIME_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}
