use crate::backup::archive::ArchiveEntry;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// One configured include path, resolved against the base directory
///
/// `src` is where the content lives on disk, `dst` is the include path as
/// configured, which becomes the prefix of every archive entry it yields.
/// Anything under `exclude` (the backup directory itself) is never yielded.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct IncludeRoot {
    src: PathBuf,
    dst: PathBuf,
    exclude: Option<PathBuf>,
}

impl IncludeRoot {
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(base_dir: P1, include: P2) -> Self {
        Self {
            src: base_dir.as_ref().join(include.as_ref()),
            dst: include.as_ref().to_path_buf(),
            exclude: None,
        }
    }

    /// Skips `dir` and everything below it, compared by canonical path.
    pub fn excluding<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.exclude = dir.as_ref().canonicalize().ok();
        self
    }

    /// Lazily enumerates the entries under this include root.
    ///
    /// Files yield file entries, directories are walked recursively (following
    /// symlinks, sorted by name) and only empty directories yield directory
    /// entries. Each call walks the file system again.
    #[named]
    pub fn entries<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
        if !self.src.exists() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("include path {:?} does not exist", self.src),
            ))
            .add_fn_name(function_path!()));
        }

        if is_excluded(&self.src, self.exclude.as_deref()) {
            tracing::warn!("Include path {:?} is inside the backup directory, skipping", self.src);
            return Ok(std::iter::empty().into_dyn_iter());
        }

        if !self.src.is_dir() {
            tracing::debug!("Including file: {:?} -> {:?}", self.src, self.dst);
            let entry = ArchiveEntry::file(self.src.as_path(), self.dst.as_path());
            return Ok(std::iter::once(Ok(entry)).into_dyn_iter());
        }

        tracing::debug!("Scanning include directory {:?}", self.src);
        let src_dir = self.src.clone();
        let dst_dir = self.dst.clone();
        let exclude = self.exclude.clone();
        let walk_exclude = self.exclude.clone();

        let entries = WalkDir::new(&self.src)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |de| !is_excluded(de.path(), walk_exclude.as_deref()))
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &src_dir, &dst_dir, exclude.as_deref()),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(entries.into_dyn_iter())
    }
}

fn is_excluded(path: &Path, exclude: Option<&Path>) -> bool {
    exclude.is_some_and(|exclude| {
        path.canonicalize()
            .map(|p| p.starts_with(exclude))
            .unwrap_or(false)
    })
}

fn process_dir_entry<P1: AsRef<Path>, P2: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P1,
    base_dst_dir: P2,
    exclude: Option<&Path>,
) -> Option<Result<ArchiveEntry>> {
    let p = de.into_path();
    let dst = match p.strip_prefix(base_src_dir.as_ref()) {
        Ok(stripped_path) => base_dst_dir.as_ref().join(stripped_path),
        Err(e) => {
            return Some(Err(Error::from(e).add_msg(format!(
                "Stripping {:?} from {:?} failed",
                base_src_dir.as_ref(),
                p
            ))))
        }
    };

    if p.is_file() {
        tracing::trace!("Including file: {:?} -> {:?}", p, dst);
        return Some(Ok(ArchiveEntry::file(p, dst)));
    }

    if p.is_dir() {
        return match std::fs::read_dir(&p) {
            Ok(children) => {
                let is_empty = !children
                    .filter_map(|c| c.ok())
                    .any(|c| !is_excluded(&c.path(), exclude));
                if is_empty {
                    tracing::trace!("Including empty directory: {:?} -> {:?}", p, dst);
                    Some(Ok(ArchiveEntry::directory(p, dst)))
                } else {
                    None
                }
            }
            Err(e) => Some(Err(Error::from(e).add_msg(format!("Cannot read directory {:?}", p)))),
        };
    }

    tracing::trace!("Skipping {:?}, not a file or directory", p);
    None
}
