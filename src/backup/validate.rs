//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories, include paths
//! and other configuration parameters.

use validator::{Validate, ValidationError};

use std::path::{Component, Path, PathBuf};

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access backup path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// Include paths are resolved against `base_dir` and become archive entry names,
/// so they must stay relative and must not climb out with `..`.
pub fn validate_include_paths(paths: &[PathBuf]) -> Result<(), ValidationError> {
    for path in paths {
        let escapes = path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.as_os_str().is_empty() {
            return Err(ValidationError::new("InvalidIncludePath").with_message(
                format!("include path {:?} must be relative and inside base_dir", path).into(),
            ));
        }
    }

    Ok(())
}

pub fn validate_not_blank<S: AsRef<str>>(value: S) -> Result<(), ValidationError> {
    if value.as_ref().trim().is_empty() {
        return Err(ValidationError::new("Blank").with_message("must not be blank".into()));
    }

    Ok(())
}

/// Runs a hand written `Validate` impl as a field level check.
pub fn validate_config_variant<T: Validate>(value: &T) -> Result<(), ValidationError> {
    value.validate().map_err(|e| {
        ValidationError::new("InvalidConfig").with_message(e.to_string().into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_dir_exist() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(temp_dir.path()).is_ok());
        assert!(validate_dir_exist(temp_dir.path().join("missing")).is_err());

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
    }

    #[test]
    fn test_validate_dir_exist_or_created_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_validate_writable_dir_rejects_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_writable_dir(&file).is_err());
        assert!(validate_writable_dir(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_validate_include_paths() {
        let ok = vec![PathBuf::from("config/app-settings.txt"), PathBuf::from("storage")];
        assert!(validate_include_paths(&ok).is_ok());

        assert!(validate_include_paths(&[PathBuf::from("../secrets")]).is_err());
        assert!(validate_include_paths(&[PathBuf::from("/etc/passwd")]).is_err());
        assert!(validate_include_paths(&[PathBuf::from("")]).is_err());
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("shop").is_ok());
        assert!(validate_not_blank("  ").is_err());
    }
}
