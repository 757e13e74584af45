use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

pub const DOCKERHUB_USERNAME: &str = "DOCKERHUB_USERNAME";
pub const DOCKERHUB_ACCESS_TOKEN: &str = "DOCKERHUB_ACCESS_TOKEN";

/// Environment variables that must be set before anything is declared
pub const REQUIRED_ENV_VARS: [&str; 2] = [DOCKERHUB_USERNAME, DOCKERHUB_ACCESS_TOKEN];

/// A fully populated set of required environment variables.
///
/// Only [`validate`] and [`validate_with`] construct this, so every key it was
/// built from is guaranteed to be present and non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvVars {
    values: BTreeMap<String, String>,
}

impl EnvVars {
    /// Value of a validated key, `None` if `key` was not in the required set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for EnvVars {
    // Values are credentials
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Read `keys` from the process environment.
///
/// Non-UTF-8 values are treated the same as absent ones.
pub fn validate(keys: &[&str]) -> Result<EnvVars, ConfigError> {
    validate_with(keys, |key| std::env::var(key).ok())
}

/// Read `keys` through `lookup`, failing with every missing or empty key
pub fn validate_with<F>(keys: &[&str], lookup: F) -> Result<EnvVars, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();

    for &key in keys {
        match lookup(key) {
            Some(value) if !value.is_empty() => {
                values.insert(key.to_string(), value);
            }
            _ => missing.push(key.to_string()),
        }
    }

    if !missing.is_empty() {
        tracing::debug!(missing = ?missing, "Required environment variables not set");
        return Err(ConfigError::MissingEnv(missing));
    }

    Ok(EnvVars { values })
}

/// Docker Hub credentials used by the pull-through cache rule
#[derive(Clone, PartialEq, Eq)]
pub struct DockerHubCredentials {
    pub username: String,
    pub access_token: String,
}

impl DockerHubCredentials {
    /// Read and validate the credentials from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars = validate(&REQUIRED_ENV_VARS)?;
        tracing::debug!("Validated {} required environment variables", vars.len());
        vars.try_into()
    }
}

impl TryFrom<EnvVars> for DockerHubCredentials {
    type Error = ConfigError;

    fn try_from(vars: EnvVars) -> Result<Self, Self::Error> {
        match (vars.get(DOCKERHUB_USERNAME), vars.get(DOCKERHUB_ACCESS_TOKEN)) {
            (Some(username), Some(access_token)) => Ok(Self {
                username: username.to_string(),
                access_token: access_token.to_string(),
            }),
            (username, token) => Err(ConfigError::MissingEnv(
                [(DOCKERHUB_USERNAME, username), (DOCKERHUB_ACCESS_TOKEN, token)]
                    .into_iter()
                    .filter(|(_, value)| value.is_none())
                    .map(|(key, _)| key.to_string())
                    .collect(),
            )),
        }
    }
}

impl fmt::Debug for DockerHubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerHubCredentials")
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_all_present_returns_exactly_required_keys() {
        let lookup = lookup_from(&[
            ("DOCKERHUB_USERNAME", "alice"),
            ("DOCKERHUB_ACCESS_TOKEN", "tok123"),
            ("UNRELATED", "ignored"),
        ]);

        let vars = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap();

        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("DOCKERHUB_USERNAME"), Some("alice"));
        assert_eq!(vars.get("DOCKERHUB_ACCESS_TOKEN"), Some("tok123"));
        assert_eq!(vars.get("UNRELATED"), None);
    }

    #[test]
    fn test_missing_token_names_only_token() {
        let lookup = lookup_from(&[("DOCKERHUB_USERNAME", "alice")]);

        let err = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("DOCKERHUB_ACCESS_TOKEN"));
        assert!(!message.contains("DOCKERHUB_USERNAME"));
    }

    #[test]
    fn test_all_missing_keys_are_reported_in_order() {
        let lookup = lookup_from(&[]);

        let err = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap_err();

        assert_eq!(
            err.missing_keys(),
            &[
                "DOCKERHUB_USERNAME".to_string(),
                "DOCKERHUB_ACCESS_TOKEN".to_string()
            ]
        );
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let lookup = lookup_from(&[
            ("DOCKERHUB_USERNAME", ""),
            ("DOCKERHUB_ACCESS_TOKEN", "tok123"),
        ]);

        let err = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap_err();

        assert_eq!(err.missing_keys(), &["DOCKERHUB_USERNAME".to_string()]);
    }

    #[test]
    fn test_whitespace_value_is_kept_verbatim() {
        let lookup = lookup_from(&[("KEY", " ")]);

        let vars = validate_with(&["KEY"], lookup).unwrap();

        assert_eq!(vars.get("KEY"), Some(" "));
        assert_eq!(vars.get("OTHER"), None);
    }

    #[test]
    fn test_no_required_keys_is_trivially_valid() {
        let vars = validate_with(&[], |_| None).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn test_credentials_from_vars() {
        let lookup = lookup_from(&[
            ("DOCKERHUB_USERNAME", "alice"),
            ("DOCKERHUB_ACCESS_TOKEN", "tok123"),
        ]);

        let vars = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap();
        let creds = DockerHubCredentials::try_from(vars).unwrap();

        assert_eq!(creds.username, "alice");
        assert_eq!(creds.access_token, "tok123");
    }

    #[test]
    fn test_credentials_need_both_keys() {
        let lookup = lookup_from(&[("DOCKERHUB_USERNAME", "alice")]);
        let vars = validate_with(&[DOCKERHUB_USERNAME], lookup).unwrap();

        let err = DockerHubCredentials::try_from(vars).unwrap_err();

        assert_eq!(err.missing_keys(), &["DOCKERHUB_ACCESS_TOKEN".to_string()]);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let lookup = lookup_from(&[
            ("DOCKERHUB_USERNAME", "alice"),
            ("DOCKERHUB_ACCESS_TOKEN", "tok123"),
        ]);
        let vars = validate_with(&REQUIRED_ENV_VARS, lookup).unwrap();

        assert!(!format!("{:?}", vars).contains("tok123"));
        let creds = DockerHubCredentials::try_from(vars).unwrap();
        assert!(!format!("{:?}", creds).contains("tok123"));
    }
}
