/// Errors raised while reading configuration, before any resource is declared.
///
/// These are the only errors synthesized locally. Everything that goes wrong
/// later (bad ARNs, permission denials, quotas) surfaces from CloudFormation
/// at deploy time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more required environment variables are absent or empty.
    /// Lists every missing key, in the order they were required.
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Names of the missing environment variables, empty for other variants
    pub fn missing_keys(&self) -> &[String] {
        match self {
            Self::MissingEnv(keys) => keys,
            _ => &[],
        }
    }
}
