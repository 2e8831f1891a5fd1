pub mod archive;
pub mod backup_config;
pub mod dump;
pub mod lock;
pub mod notifications;
pub mod orchestrator;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;

/// File name stem shared by the dump and the archive of one run.
pub static FILE_PREFIX: &str = "backup_db_";
/// `YYYY-MM-DD_HH-MM-SS`, used in artifact file names.
pub static FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
