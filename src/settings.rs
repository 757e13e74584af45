use config::{Config, Environment, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::ConfigError;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Prefix ECR requires for pull-through cache credential secrets
pub const PULL_THROUGH_SECRET_PREFIX: &str = "ecr-pullthroughcache/";

/// Non-secret stack parameters.
///
/// Credentials never live here; they come from [`crate::env`].
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub stack: StackSettings,
    pub registry: RegistrySettings,
    pub service: ServiceSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StackSettings {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// AWS account id. Empty means "resolve from the caller's credentials".
    #[serde(default)]
    pub account: String,
    pub region: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistrySettings {
    /// Upstream registry kind as ECR names it (e.g. "docker-hub")
    pub upstream_registry: String,
    pub upstream_registry_url: String,
    /// Local namespace the cache mirrors into
    pub repository_prefix: String,
    /// Upstream repository, e.g. "library/nginx"
    pub image: String,
    pub tag: String,
    pub secret_name: String,
}

impl RegistrySettings {
    /// Name of the mirrored repository inside the cache namespace
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.repository_prefix, self.image)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServiceSettings {
    pub container_name: String,
    pub container_port: u16,
    pub listener_port: u16,
    /// Fargate CPU units
    pub cpu: u32,
    pub memory_mib: u32,
    pub desired_count: u32,
    pub health_check_path: String,
    pub log_retention_days: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct NetworkSettings {
    #[serde(default)]
    pub lookup: VpcLookupSettings,
}

/// How the VPC the service runs in is found
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VpcLookupSettings {
    /// The account's default VPC in the stack region
    #[default]
    DefaultVpc,
    /// A specific VPC, subnets discovered by lookup
    VpcId { vpc_id: String },
    /// Fully specified, no lookup performed
    Static {
        vpc_id: String,
        subnet_ids: Vec<String>,
        #[serde(default)]
        availability_zones: Vec<String>,
    },
}

/// Valid Fargate memory sizes (MiB) per CPU setting
fn fargate_memory_options(cpu: u32) -> Option<Vec<u32>> {
    let range = |from: u32, to: u32, step: u32| -> Vec<u32> {
        (from..=to).step_by(step as usize).collect()
    };
    match cpu {
        256 => Some(vec![512, 1024, 2048]),
        512 => Some(range(1024, 4096, 1024)),
        1024 => Some(range(2048, 8192, 1024)),
        2048 => Some(range(4096, 16384, 1024)),
        4096 => Some(range(8192, 30720, 1024)),
        8192 => Some(range(16384, 61440, 4096)),
        16384 => Some(range(32768, 122880, 8192)),
        _ => None,
    }
}

/// Retention periods CloudWatch Logs accepts
const LOG_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

fn env_placeholder() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex"))
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        env_placeholder()
            .replace_all(s, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match env::var(var_name) {
                    Ok(val) if !val.is_empty() => val,
                    _ => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Substitute environment variables in every string of a config tree.
    ///
    /// Only string values are touched, so `config`'s own deserializer still
    /// coerces between numbers and strings afterwards.
    fn substitute_env_vars(value: &mut config::Value) {
        use config::ValueKind;

        match &mut value.kind {
            ValueKind::String(s) => *s = Self::substitute_env_vars_in_string(s),
            ValueKind::Table(table) => table.values_mut().for_each(Self::substitute_env_vars),
            ValueKind::Array(items) => items.iter_mut().for_each(Self::substitute_env_vars),
            _ => {}
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    fn try_add_config_file(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &Path,
        name: &str,
    ) -> config::ConfigBuilder<config::builder::DefaultState> {
        for ext in ["toml", "yaml", "yml"] {
            let path = config_dir.join(format!("{}.{}", name, ext));
            if path.exists() {
                tracing::info!("Loading config file: {}", path.display());
                return builder.add_source(config::File::from(path));
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir.display(),
            name
        );
        builder
    }

    /// Load settings from the built-in defaults, the optional `stack` and
    /// `local` files in `config_dir`, and `STACK__SECTION__KEY` variables
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let environment = Environment::with_prefix("STACK")
            .prefix_separator("__")
            .separator("__");
        Self::load_with(config_dir, environment)
    }

    fn load_with(config_dir: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(config::File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(dir) = config_dir {
            // Later sources win: defaults < stack < local < environment
            for name in ["stack", "local"] {
                builder = Self::try_add_config_file(builder, dir, name);
            }
        }

        let config = builder.add_source(environment).build()?;

        let mut root_value = config.cache;
        Self::substitute_env_vars(&mut root_value);

        // Deserializing from config::Value lets numeric-looking env overrides
        // (an account id, a "1.27" tag) land in string fields
        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(root_value, |path| {
            unused_fields.push(path.to_string());
        })?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that CloudFormation would only reject at deploy time
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name_re = regex::Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("static regex");
        if !name_re.is_match(&self.stack.name) {
            return Err(ConfigError::invalid(
                "stack.name",
                format!(
                    "'{}' must start with a letter and contain only letters, digits and hyphens",
                    self.stack.name
                ),
            ));
        }
        if self.stack.region.is_empty() {
            return Err(ConfigError::invalid("stack.region", "must not be empty"));
        }
        if !self.stack.account.is_empty()
            && !(self.stack.account.len() == 12
                && self.stack.account.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(ConfigError::invalid(
                "stack.account",
                format!("'{}' is not a 12-digit account id", self.stack.account),
            ));
        }

        self.validate_registry()?;
        self.validate_service()?;
        self.validate_network()
    }

    fn validate_registry(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;

        match registry.secret_name.strip_prefix(PULL_THROUGH_SECRET_PREFIX) {
            Some(rest) if !rest.is_empty() => {}
            _ => {
                return Err(ConfigError::invalid(
                    "registry.secret_name",
                    format!(
                        "'{}' must start with '{}' followed by a name",
                        registry.secret_name, PULL_THROUGH_SECRET_PREFIX
                    ),
                ))
            }
        }

        let prefix_re = regex::Regex::new(r"^[a-z0-9][a-z0-9._-]{1,29}$").expect("static regex");
        if !prefix_re.is_match(&registry.repository_prefix) {
            return Err(ConfigError::invalid(
                "registry.repository_prefix",
                format!(
                    "'{}' must be 2-30 lowercase letters, digits, '.', '_' or '-'",
                    registry.repository_prefix
                ),
            ));
        }

        for (field, value) in [
            ("registry.upstream_registry", &registry.upstream_registry),
            ("registry.upstream_registry_url", &registry.upstream_registry_url),
            ("registry.image", &registry.image),
            ("registry.tag", &registry.tag),
        ] {
            if value.is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }

        Ok(())
    }

    fn validate_service(&self) -> Result<(), ConfigError> {
        let service = &self.service;

        if service.container_name.is_empty() {
            return Err(ConfigError::invalid("service.container_name", "must not be empty"));
        }
        if service.container_port == 0 {
            return Err(ConfigError::invalid("service.container_port", "must be 1-65535"));
        }
        if service.listener_port == 0 {
            return Err(ConfigError::invalid("service.listener_port", "must be 1-65535"));
        }

        match fargate_memory_options(service.cpu) {
            None => {
                return Err(ConfigError::invalid(
                    "service.cpu",
                    format!("{} is not a Fargate CPU size", service.cpu),
                ))
            }
            Some(options) if !options.contains(&service.memory_mib) => {
                return Err(ConfigError::invalid(
                    "service.memory_mib",
                    format!(
                        "{} MiB is not valid with {} CPU units",
                        service.memory_mib, service.cpu
                    ),
                ))
            }
            Some(_) => {}
        }

        if !service.health_check_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "service.health_check_path",
                "must start with '/'",
            ));
        }
        if !LOG_RETENTION_DAYS.contains(&service.log_retention_days) {
            return Err(ConfigError::invalid(
                "service.log_retention_days",
                format!(
                    "{} is not a CloudWatch Logs retention period",
                    service.log_retention_days
                ),
            ));
        }

        Ok(())
    }

    fn validate_network(&self) -> Result<(), ConfigError> {
        let vpc_id = match &self.network.lookup {
            VpcLookupSettings::DefaultVpc => return Ok(()),
            VpcLookupSettings::VpcId { vpc_id } => vpc_id,
            VpcLookupSettings::Static {
                vpc_id, subnet_ids, ..
            } => {
                // An application load balancer needs two subnets
                if subnet_ids.len() < 2 {
                    return Err(ConfigError::invalid(
                        "network.lookup.subnet_ids",
                        "at least two subnets are required",
                    ));
                }
                vpc_id
            }
        };

        if !vpc_id.starts_with("vpc-") {
            return Err(ConfigError::invalid(
                "network.lookup.vpc_id",
                format!("'{}' is not a VPC id", vpc_id),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    /// Built-in defaults with a fixed account, independent of the process environment
    pub(crate) fn for_tests() -> Self {
        let environment = Environment::with_prefix("STACK").source(Some(config::Map::new()));
        let mut settings =
            Self::load_with(None, environment).expect("built-in defaults are valid");
        settings.stack.account = "123456789012".to_string();
        settings.stack.region = "us-east-1".to_string();
        settings
    }
}
