pub mod entries;
pub mod zip;

use crate::backup::archive::entries::IncludeRoot;
use crate::backup::archive::zip::ZipEntryWriter;
use crate::backup::dump::DumpArtifact;
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};

use function_name::named;
use getset::{CopyGetters, Getters};
use itertools::Itertools;

use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Represents a single file or directory to be written into the archive
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Source path on the filesystem
    pub src: Arc<Path>,
    /// Destination path within the archive
    pub dst: Arc<Path>,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    pub fn file<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
            kind: EntryKind::Directory,
        }
    }

    /// Zip entry name: `/` separated, directories end with `/`
    pub fn entry_name(&self) -> String {
        let name = self
            .dst
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy()),
                _ => None,
            })
            .join("/");
        match self.kind {
            EntryKind::File => name,
            EntryKind::Directory => format!("{name}/"),
        }
    }
}

/// Final bundle handed to the notifier
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ArchiveArtifact {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get_copy = "pub")]
    encrypted: bool,
    #[getset(get = "pub")]
    entries: Vec<String>,
}

impl ArchiveArtifact {
    pub fn new<P: Into<PathBuf>>(path: P, size: u64, encrypted: bool, entries: Vec<String>) -> Self {
        Self {
            path: path.into(),
            size,
            encrypted,
            entries,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup.zip".to_string())
    }
}

/// Packs a dump and the configured include paths into one zip file
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct Archiver {
    base_dir: PathBuf,
}

impl Archiver {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Writes `dump` plus every include path into the zip at `dst`.
    ///
    /// The archive is built in `<dst>.tmp` and renamed on success, after which the
    /// dump file is deleted. An existing `dst` is never overwritten. Include paths that cannot be read are skipped and
    /// reported as the second element of the returned tuple. Any other failure
    /// removes the temporary file and keeps the dump.
    #[named]
    pub fn archive(
        &self,
        dump: &DumpArtifact,
        dst: &Path,
        include: &[PathBuf],
        password: Option<&RedactedString>,
    ) -> Result<(ArchiveArtifact, Option<Error>)> {
        tracing::info!(
            "Creating archive {:?} with {} include paths, encrypted: {}",
            dst,
            include.len(),
            password.is_some()
        );

        if dst.exists() {
            return Err(Error::archive_failed(
                Error::from(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("archive {:?} already exists", dst),
                ))
                .add_fn_name(function_path!()),
            ));
        }

        let file_path_tmp = tmp_path(dst);
        let mut non_fatal = Vec::new();

        let archive_create_res = self
            .write_archive(dump, &file_path_tmp, include, password, &mut non_fatal)
            .and_then(|names| {
                std::fs::rename(&file_path_tmp, dst)
                    .map(|_| names)
                    .map_err(Error::from)
            })
            .add_fn_name(function_path!())
            .map_err(|mut e| {
                if file_path_tmp.exists() {
                    if let Err(e2) = std::fs::remove_file(&file_path_tmp) {
                        e = e.chain(Error::from(e2).add_msg("Delete tmp file failed."));
                    }
                }
                Error::archive_failed(e)
            });

        let names = archive_create_res?;

        std::fs::remove_file(dump.path())
            .map_err(Error::from)
            .add_msg(format!("Removing archived dump {:?} failed", dump.path()))
            .map_err(Error::archive_failed)?;

        let size = std::fs::metadata(dst)
            .map_err(Error::from)
            .map_err(Error::archive_failed)?
            .len();
        tracing::info!("Archive created: {:?} ({} bytes, {} entries)", dst, size, names.len());

        let artifact = ArchiveArtifact::new(dst, size, password.is_some(), names);
        Ok((artifact, convert_error_vec(non_fatal).err()))
    }

    fn write_archive(
        &self,
        dump: &DumpArtifact,
        tmp: &Path,
        include: &[PathBuf],
        password: Option<&RedactedString>,
        non_fatal: &mut Vec<Error>,
    ) -> Result<Vec<String>> {
        let backup_dir = tmp.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(backup_dir)?;
        let file = File::create_new(tmp)
            .map_err(Error::from)
            .add_msg(format!("Cannot open archive {:?} for writing", tmp))?;

        let mut writer = ZipEntryWriter::new(
            BufWriter::new(file),
            password.map(|p| p.inner().as_str()),
        );

        writer.add(&ArchiveEntry::file(dump.path().as_path(), Path::new(&dump.entry_name())))?;

        for include_path in include {
            let root = IncludeRoot::new(&self.base_dir, include_path).excluding(backup_dir);
            match root.entries() {
                Ok(iter) => {
                    for entry in iter {
                        match entry {
                            Ok(entry) => writer.add(&entry)?,
                            Err(e) => {
                                tracing::warn!("Ignoring entry: {e}");
                                non_fatal.push(e)
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping include path {:?}: {e}", include_path);
                    non_fatal.push(e.add_msg(format!("Skipping include path {:?}", include_path)))
                }
            }
        }

        let (inner, names) = writer.finish()?;
        inner
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;

        Ok(names)
    }
}

fn tmp_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::zip::read_entries;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        base_dir: PathBuf,
        backup_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let base_dir = temp_dir.path().join("app");
        let backup_dir = temp_dir.path().join("backups");
        std::fs::create_dir_all(base_dir.join("config")).unwrap();
        std::fs::create_dir_all(base_dir.join("storage/logs")).unwrap();
        std::fs::create_dir_all(base_dir.join("storage/cache")).unwrap();
        std::fs::create_dir_all(&backup_dir).unwrap();
        std::fs::write(base_dir.join("config/app-settings.txt"), "debug=false").unwrap();
        std::fs::write(base_dir.join("storage/logs/app.log"), "line").unwrap();
        Fixture {
            _temp_dir: temp_dir,
            base_dir,
            backup_dir,
        }
    }

    fn write_dump(dir: &Path) -> DumpArtifact {
        let path = dir.join("backup_db_2024-05-01_10-00-00.sql");
        std::fs::write(&path, "-- dump content --").unwrap();
        DumpArtifact::new(path, 18)
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let entry = ArchiveEntry::file(PathBuf::from("/x"), PathBuf::from("a").join("b").join("c.txt"));
        assert_eq!(entry.entry_name(), "a/b/c.txt");

        let entry = ArchiveEntry::directory(PathBuf::from("/x"), PathBuf::from("a/empty").join(""));
        assert_eq!(entry.entry_name(), "a/empty/");
    }

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/b/backup_db_x.zip")),
            PathBuf::from("/b/backup_db_x.zip.tmp")
        );
    }

    #[test]
    fn test_archive_without_includes_contains_only_dump() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");

        let (artifact, non_fatal) = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &[], None)
            .unwrap();

        assert!(non_fatal.is_none());
        assert_eq!(artifact.entries(), &vec!["backup_db_2024-05-01_10-00-00.sql".to_string()]);
        assert!(!dump.path().exists());
        assert!(dst.exists());
        assert!(!tmp_path(&dst).exists());

        let entries = read_entries(&dst).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].1);
    }

    #[test]
    fn test_archive_with_includes_and_empty_dir() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");
        let include = vec![PathBuf::from("config/app-settings.txt"), PathBuf::from("storage")];

        let (artifact, _) = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &include, None)
            .unwrap();

        let names: Vec<_> = read_entries(&dst).unwrap().into_iter().map(|e| e.0).collect();
        assert_eq!(
            names,
            vec![
                "backup_db_2024-05-01_10-00-00.sql",
                "config/app-settings.txt",
                "storage/cache/",
                "storage/logs/app.log",
            ]
        );
        assert_eq!(artifact.entries(), &names);
        assert!(!artifact.encrypted());
    }

    #[test]
    fn test_archive_with_password_encrypts_every_entry() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");
        let include = vec![PathBuf::from("config"), PathBuf::from("storage")];
        let password = RedactedString::from("correct horse battery");

        let (artifact, _) = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &include, Some(&password))
            .unwrap();

        assert!(artifact.encrypted());
        let entries = read_entries(&dst).unwrap();
        assert_eq!(
            entries,
            vec![
                ("backup_db_2024-05-01_10-00-00.sql".to_string(), true),
                ("config/app-settings.txt".to_string(), true),
                ("storage/cache/".to_string(), true),
                ("storage/logs/app.log".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_missing_include_is_non_fatal() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");
        let include = vec![PathBuf::from("missing.txt"), PathBuf::from("config")];

        let (artifact, non_fatal) = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &include, None)
            .unwrap();

        assert!(non_fatal.unwrap().to_string().contains("missing.txt"));
        assert_eq!(artifact.entries().len(), 2);
    }

    #[test]
    fn test_archive_is_structurally_idempotent() {
        let f = fixture();
        let include = vec![PathBuf::from("config"), PathBuf::from("storage")];
        let archiver = Archiver::new(&f.base_dir);

        let dump = write_dump(&f.backup_dir);
        let first = f.backup_dir.join("first.zip");
        let (a, _) = archiver.archive(&dump, &first, &include, None).unwrap();

        let dump = write_dump(&f.backup_dir);
        let second = f.backup_dir.join("second.zip");
        let (b, _) = archiver.archive(&dump, &second, &include, None).unwrap();

        assert_eq!(a.entries(), b.entries());
    }

    #[test]
    fn test_backup_dir_under_include_is_not_archived() {
        let f = fixture();
        let backup_dir = f.base_dir.join("storage/app/backups");
        std::fs::create_dir_all(&backup_dir).unwrap();
        std::fs::write(backup_dir.join(".backup.lock"), "").unwrap();
        let dump = write_dump(&backup_dir);
        let dst = backup_dir.join("backup_db_2024-05-01_10-00-00.zip");

        let (artifact, non_fatal) = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &[PathBuf::from("storage")], None)
            .unwrap();

        assert!(non_fatal.is_none());
        assert_eq!(
            artifact.entries(),
            &vec![
                "backup_db_2024-05-01_10-00-00.sql".to_string(),
                "storage/app/".to_string(),
                "storage/cache/".to_string(),
                "storage/logs/app.log".to_string(),
            ]
        );
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");
        std::fs::write(&dst, "earlier run").unwrap();

        let err = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &[], None)
            .unwrap_err();

        assert!(matches!(err, Error::ArchiveFailed(_)));
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "earlier run");
        assert!(dump.path().exists());
    }

    #[test]
    fn test_archive_open_failure_keeps_dump() {
        let f = fixture();
        let dump = write_dump(&f.backup_dir);
        let dst = f.backup_dir.join("backup_db_2024-05-01_10-00-00.zip");
        // a leftover tmp file makes create_new fail
        std::fs::write(tmp_path(&dst), "stale").unwrap();

        let err = Archiver::new(&f.base_dir)
            .archive(&dump, &dst, &[], None)
            .unwrap_err();

        assert!(matches!(err, Error::ArchiveFailed(_)));
        assert!(dump.path().exists());
        assert!(!dst.exists());
    }
}
