use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Lettre(#[from] lettre::error::Error),
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error(transparent)]
    Transport(Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid content type: {0}")]
    ContentType(String),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    Which(#[from] which::Error),
    #[error("Dump process exited with {status}:\n{}", indent::indent_all_with("  ", .stderr.trim()))]
    DumpExit { status: ExitStatus, stderr: String },
    #[error("Dump process did not finish within {0:?} and was killed")]
    DumpTimeout(Duration),
    #[error("Dump produced no output: {0:?}")]
    EmptyDump(PathBuf),
    #[error("Another backup run holds the lock {0:?}")]
    AlreadyRunning(PathBuf),
    #[error("No recipient was attempted")]
    NoRecipients,
    #[error("Dump failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    DumpFailed(Box<Error>),
    #[error("Archive failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    ArchiveFailed(Box<Error>),
    #[error("Delivery to {recipient} failed:\n{}", indent::indent_all_with("  ", .error.to_string()))]
    DeliveryFailed { recipient: String, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { error: Box<Error>, fn_name: String },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn dump_failed(error: Error) -> Self {
        Self::DumpFailed(Box::new(error))
    }

    pub fn archive_failed(error: Error) -> Self {
        Self::ArchiveFailed(Box::new(error))
    }

    pub fn delivery_failed<S: Into<String>>(recipient: S, error: Error) -> Self {
        Self::DeliveryFailed {
            recipient: recipient.into(),
            error: Box::new(error),
        }
    }

    pub fn transport<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Transport(Box::new(error))
    }

    pub fn lots_of_error(errors: Vec<Error>) -> Self {
        errors.into()
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips message and function name wrappers to find the stage-level error.
    pub fn root_kind(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root_kind(),
            e => e,
        }
    }
}
