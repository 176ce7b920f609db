use crate::config::models::{AppConfig, ServerSettings};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid context path '{path}': {reason}")]
    InvalidContextPath { path: String, reason: String },

    #[error("Protocol {protocol} requires a TLS certificate and key")]
    MissingTls { protocol: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

/// Characters that cannot appear in a context path. Wildcards and captures would turn
/// the prefix into a pattern, the others end the path component of a URL.
const FORBIDDEN_CONTEXT_CHARS: &[char] = &['*', '{', '}', '?', '#', ':'];

/// Server settings validator
pub struct SettingsValidator;

impl SettingsValidator {
    /// Validate a complete set of server settings
    pub fn validate(settings: &ServerSettings) -> ValidationResult<()> {
        Self::validate_context_path(&settings.context_path)?;

        if settings.protocol.is_secure() && settings.tls.is_none() {
            return Err(ValidationError::MissingTls {
                protocol: settings.protocol.to_string(),
            });
        }

        if settings.shutdown_timeout_secs == 0 {
            return Err(ValidationError::InvalidField {
                field: "shutdown_timeout_secs".to_string(),
                message: "must be at least one second".to_string(),
            });
        }

        Ok(())
    }

    /// Validate the binary's configuration file
    pub fn validate_app(config: &AppConfig) -> ValidationResult<()> {
        if config.logging.level.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Self::validate(&config.server)
    }

    /// A context path is either empty (mount at the root) or a literal URL path prefix
    /// such as `/api/v1`.
    pub fn validate_context_path(path: &str) -> ValidationResult<()> {
        if path.is_empty() {
            return Ok(());
        }

        let invalid = |reason: &str| ValidationError::InvalidContextPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if path == "/" {
            return Err(invalid("use an empty context path to mount at the root"));
        }
        if path.ends_with('/') {
            return Err(invalid("must not end with '/'"));
        }
        if path.contains("//") {
            return Err(invalid("must not contain empty segments"));
        }
        if let Some(c) = path
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CONTEXT_CHARS.contains(c))
        {
            return Err(invalid(&format!("character {c:?} is not allowed")));
        }

        Ok(())
    }
}
