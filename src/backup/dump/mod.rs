pub mod mysql;

use crate::backup::result_error::result::Result;
use getset::{CopyGetters, Getters};
use std::path::{Path, PathBuf};

/// Raw database dump written to disk, owned by the orchestrator until the
/// archiver consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DumpArtifact {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get_copy = "pub")]
    size: u64,
}

impl DumpArtifact {
    pub fn new<P: Into<PathBuf>>(path: P, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    /// Name used for the dump entry inside the archive
    pub fn entry_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dump.sql".to_string())
    }
}

/// Capability producing a database dump into `dst`.
///
/// Implementations must fail instead of returning an empty artifact.
pub trait Dumper {
    fn dump(&self, dst: &Path) -> Result<DumpArtifact>;
}

impl<D: Dumper + ?Sized> Dumper for &D {
    fn dump(&self, dst: &Path) -> Result<DumpArtifact> {
        (**self).dump(dst)
    }
}
