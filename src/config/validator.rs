// Settings validation
// Startup validation of relaunch.json; fails fast with actionable errors

use crate::config::settings::LauncherSettings;
use crate::config::types::{LaunchError, Result};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate settings at startup. Errors are fatal; warnings are returned.
pub fn validate_settings(settings: &LauncherSettings) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_timeouts(settings, &mut result);
    validate_retry(settings, &mut result);
    validate_paths(settings, &mut result);

    if !result.is_valid() {
        return Err(LaunchError::Config(format!(
            "settings validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_timeouts(settings: &LauncherSettings, result: &mut ValidationResult) {
    if settings.connect_timeout_ms == 0 {
        result.add_error("connect_timeout_ms cannot be zero".to_string());
    }
    if settings.read_timeout_ms == 0 {
        result.add_error("read_timeout_ms cannot be zero".to_string());
    }
    if settings.read_timeout_ms > 0 && settings.read_timeout_ms < 500 {
        result.add_warning(format!(
            "read_timeout_ms {} is very low, slow mirrors will fail",
            settings.read_timeout_ms
        ));
    }
}

fn validate_retry(settings: &LauncherSettings, result: &mut ValidationResult) {
    if settings.retry_attempts == 0 {
        result.add_error("retry_attempts cannot be zero".to_string());
    }
    if settings.max_chain_depth == 0 {
        result.add_error("max_chain_depth cannot be zero".to_string());
    }
    if settings.accept_invalid_certs {
        result.add_warning(
            "accept_invalid_certs is enabled; only tls-cert pinning protects https fetches"
                .to_string(),
        );
    }
}

fn validate_paths(settings: &LauncherSettings, result: &mut ValidationResult) {
    if settings.base_dir.exists() && !settings.base_dir.is_dir() {
        result.add_error(format!(
            "base_dir exists but is not a directory: {:?}",
            settings.base_dir
        ));
    }

    if let Some(ref home) = settings.runtime_home {
        if !home.is_dir() {
            result.add_warning(format!("runtime_home does not exist: {:?}", home));
        }
    }

    if let Some(ref dir) = settings.command_file_dir {
        if !dir.is_dir() {
            result.add_warning(format!("command_file_dir does not exist: {:?}", dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LauncherSettings {
        let mut settings = LauncherSettings::with_base_dir(std::env::temp_dir());
        settings.runtime_home = None;
        settings
    }

    #[test]
    fn test_valid_default_settings() {
        let result = validate_settings(&settings()).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut s = settings();
        s.connect_timeout_ms = 0;
        s.read_timeout_ms = 0;

        match validate_settings(&s) {
            Err(LaunchError::Config(msg)) => {
                assert!(msg.contains("connect_timeout_ms cannot be zero"));
                assert!(msg.contains("read_timeout_ms cannot be zero"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut s = settings();
        s.retry_attempts = 0;
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn test_file_as_base_dir_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut s = settings();
        s.base_dir = file.path().to_path_buf();
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn test_insecure_tls_warns() {
        let mut s = settings();
        s.accept_invalid_certs = true;

        let result = validate_settings(&s).unwrap();
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("accept_invalid_certs")));
    }
}
