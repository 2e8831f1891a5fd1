use crate::backup::dump::mysql::DatabaseConfig;
use crate::backup::notifications::NotificationConfig;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::{
    validate_config_variant, validate_dir_exist, validate_include_paths, validate_not_blank,
    validate_writable_dir,
};
use bon::Builder;
use chrono::{DateTime, TimeZone};
use getset::{CopyGetters, Getters};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Display;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationErrors};

static SUBJECT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Immutable snapshot of everything one backup run needs
///
/// Loaded once from YAML, validated, then passed by reference into every
/// component of the run.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    app_name: String,
    /// Directory include paths are resolved against, defaults to the working directory
    #[builder(into)]
    base_dir: Option<PathBuf>,
    #[validate(nested)]
    database: DatabaseConfig,
    #[validate(nested)]
    backup: BackupSettings,
    #[validate(custom(function = validate_config_variant))]
    notification: NotificationConfig,
}

/// What a partial delivery failure means for the run
///
/// The archive is kept on disk whenever a recipient was missed, whatever the policy.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Failures are logged, the run still succeeds
    BestEffort,
    /// Any failed recipient fails the run
    #[default]
    RequireAll,
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupSettings {
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    #[getset(get = "pub")]
    path: PathBuf,
    #[serde(default)]
    #[validate(custom(function = validate_include_paths))]
    #[builder(default)]
    #[getset(get = "pub")]
    include: Vec<PathBuf>,
    #[validate(nested)]
    #[builder(into)]
    #[getset(get = "pub")]
    zip_password: Option<RedactedString>,
    #[validate(length(min = 1))]
    #[getset(get = "pub")]
    recipients: Vec<Mailbox>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    keep_local: bool,
    /// Kept archives older than this are pruned, only used with `keep_local`
    #[serde(default, with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    max_age: Option<Duration>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    delivery_policy: DeliveryPolicy,
}

impl BackupConfig {
    /// Reads and validates a YAML config file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(Error::from)
            .add_msg(format!("Cannot open config file: {:?}", path))
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .add_msg(format!("Parse YAML config failed: {:?}", path))
            })?;

        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))?;

        Ok(config)
    }

    /// `base_dir` or the working directory, which must exist.
    pub fn resolved_base_dir(&self) -> Result<PathBuf> {
        let dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(Error::from)
                .add_msg("Cannot resolve working directory as base_dir")?,
        };

        validate_dir_exist(&dir).map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.add("base_dir", e);
            Error::from(errors)
        })?;

        Ok(dir)
    }

    pub fn mail_subject<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: Display,
    {
        format!(
            "{} Database Backup / {}",
            self.app_name,
            now.format(SUBJECT_TIME_FORMAT)
        )
    }

    pub fn mail_body(&self) -> String {
        format!("{} Database Backup attached (ZIP).", self.app_name)
    }
}
