use crate::backup::dump::{DumpArtifact, Dumper};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_not_blank;

use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

static DEFAULT_DUMP_COMMAND: &str = "mysqldump";
static WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn default_dump_command() -> String {
    DEFAULT_DUMP_COMMAND.to_string()
}

/// Connection parameters and dump utility settings for a MySQL compatible database
///
/// The dump utility receives credentials as separate process arguments, never
/// through a shell, and must write the dump to its standard output.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DatabaseConfig {
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    host: String,
    port: Option<u16>,
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    database: String,
    #[serde(default = "default_dump_command")]
    #[builder(default = default_dump_command(), into)]
    dump_command: String,
    #[serde(default)]
    #[builder(default)]
    extra_args: Vec<String>,
    /// Upper bound for the dump process, killed when exceeded
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn dump_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--user={}", self.username),
            format!("--password={}", self.password.inner()),
            format!("--host={}", self.host),
        ];
        if let Some(port) = self.port {
            args.push(format!("--port={port}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(self.database.clone());
        args
    }

    fn run_dump(&self, program: &Path, dst: &Path) -> Result<u64> {
        let out = File::create(dst)
            .map_err(Error::from)
            .add_msg(format!("Cannot create dump file {:?}", dst))?;

        let mut child = Command::new(program)
            .args(self.dump_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::from)
            .add_msg(format!("Cannot spawn {:?}", program))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("dump stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("dump stderr was not captured"))?;

        let stdout_handle = thread::spawn(move || -> std::io::Result<u64> {
            let mut writer = BufWriter::new(out);
            let written = std::io::copy(&mut stdout, &mut writer)?;
            writer.flush()?;
            Ok(written)
        });
        let stderr_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = wait_with_timeout(&mut child, self.timeout);
        let written = stdout_handle
            .join()
            .map_err(|_| std::io::Error::other("dump stdout reader panicked"))?;
        let stderr = stderr_handle.join().unwrap_or_default();
        let status = status?;

        if !stderr.trim().is_empty() {
            tracing::debug!("Dump stderr: {}", stderr.trim());
        }
        if !status.success() {
            return Err(Error::DumpExit { status, stderr });
        }

        Ok(written?)
    }
}

impl Dumper for DatabaseConfig {
    #[named]
    fn dump(&self, dst: &Path) -> Result<DumpArtifact> {
        tracing::info!(
            "Dumping database {:?} on {:?} to {:?}",
            self.database,
            self.host,
            dst
        );

        let res = dst
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(Error::from)
            .and_then(|_| {
                which::which(&self.dump_command)
                    .map_err(Error::from)
                    .add_msg(format!("Cannot find dump command {:?}", self.dump_command))
            })
            .and_then(|program| self.run_dump(&program, dst))
            .and_then(|size| {
                if size == 0 {
                    Err(Error::EmptyDump(dst.to_path_buf()))
                } else {
                    Ok(DumpArtifact::new(dst, size))
                }
            })
            .add_fn_name(function_path!());

        match res {
            Ok(artifact) => {
                tracing::info!("Dump written: {:?} ({} bytes)", artifact.path(), artifact.size());
                Ok(artifact)
            }
            Err(mut e) => {
                if dst.exists() {
                    if let Err(e2) = std::fs::remove_file(dst) {
                        e = e.chain(Error::from(e2).add_msg("Delete failed dump file failed."));
                    }
                }
                Err(Error::dump_failed(e))
            }
        }
    }
}

/// Waits for `child`, killing it once `timeout` elapses.
pub fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::error!("Dump process exceeded {:?}, killing it", timeout);
            child.kill()?;
            child.wait()?;
            return Err(Error::DumpTimeout(timeout));
        }
        thread::sleep(WAIT_POLL_INTERVAL.min(remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(command: &str) -> DatabaseConfig {
        DatabaseConfig::builder()
            .host("localhost")
            .username("root")
            .password("secret")
            .database("shop")
            .dump_command(command)
            .build()
    }

    #[test]
    fn test_dump_args_order() {
        let config = DatabaseConfig::builder()
            .host("db.internal")
            .port(3307)
            .username("backup")
            .password("p@ss word")
            .database("shop")
            .extra_args(vec!["--single-transaction".to_string()])
            .build();

        assert_eq!(
            config.dump_args(),
            vec![
                "--user=backup",
                "--password=p@ss word",
                "--host=db.internal",
                "--port=3307",
                "--single-transaction",
                "shop",
            ]
        );
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let debug_str = format!("{:?}", config("mysqldump"));
        assert!(!debug_str.contains("secret"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let yaml = "host: localhost\nusername: root\npassword: pw\ndatabase: shop\ntimeout: 5m\n";
        let config: DatabaseConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.dump_command(), "mysqldump");
        assert!(config.extra_args().is_empty());
        assert_eq!(config.timeout(), &Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_database_is_invalid() {
        let config = DatabaseConfig::builder()
            .host("localhost")
            .username("root")
            .password("pw")
            .database(" ")
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_dump_captures_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("nested/backup_db_x.sql");

        // echo prints its arguments, which stands in for a dump payload
        let artifact = config("echo").dump(&dst).unwrap();

        let content = std::fs::read_to_string(&dst).unwrap();
        assert_eq!(content, "--user=root --password=secret --host=localhost shop\n");
        assert_eq!(artifact.size(), content.len() as u64);
        assert_eq!(artifact.path(), &dst);
    }

    #[test]
    #[cfg(unix)]
    fn test_dump_non_zero_exit_fails_and_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("backup_db_x.sql");

        let err = config("false").dump(&dst).unwrap_err();

        assert!(matches!(err.root_kind(), Error::DumpFailed(_)));
        assert!(!dst.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_dump_empty_output_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("backup_db_x.sql");

        let err = config("true").dump(&dst).unwrap_err();

        assert!(err.to_string().contains("Dump produced no output"));
        assert!(!dst.exists());
    }

    #[test]
    fn test_dump_missing_command_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("backup_db_x.sql");

        let err = config("definitely-not-a-dump-tool-1234")
            .dump(&dst)
            .unwrap_err();

        assert!(matches!(err, Error::DumpFailed(_)));
        assert!(!dst.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_wait_with_timeout_kills_slow_process() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();

        let res = wait_with_timeout(&mut child, Some(Duration::from_millis(100)));

        assert!(matches!(res, Err(Error::DumpTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    #[cfg(unix)]
    fn test_wait_with_timeout_returns_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_timeout(&mut child, Some(Duration::from_secs(5))).unwrap();
        assert!(status.success());
    }
}
