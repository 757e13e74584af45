//! VPC lookup.
//!
//! The stack never declares a VPC; it places the load balancer and the
//! service into an existing one. Which VPC and which subnets is resolved here,
//! once per synth, and remembered in the [`ContextCache`] so later synths are
//! deterministic and work without AWS credentials.

pub mod context;

#[cfg(feature = "aws")]
pub mod aws;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::settings::{Settings, VpcLookupSettings};
pub use context::ContextCache;

/// An application load balancer must span at least two subnets
pub const MIN_PUBLIC_SUBNETS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("No VPC matched {0}")]
    NotFound(String),

    #[error("{count} VPCs matched {filter}; expected exactly one")]
    Ambiguous { filter: String, count: usize },

    #[error("VPC {vpc_id} has {found} public subnets; at least {MIN_PUBLIC_SUBNETS} are required")]
    TooFewPublicSubnets { vpc_id: String, found: usize },

    #[error("No cached lookup for '{0}' and live lookups are unavailable in this build")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpcFilter {
    Default,
    Id(String),
}

/// What to look for, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcQuery {
    pub account: String,
    pub region: String,
    pub filter: VpcFilter,
}

impl VpcQuery {
    /// Key under which the result is stored in the context cache
    pub fn context_key(&self) -> String {
        let filter = match &self.filter {
            VpcFilter::Default => "filter.isDefault=true".to_string(),
            VpcFilter::Id(id) => format!("filter.vpc-id={}", id),
        };
        format!(
            "vpc-provider:account={}:{}:region={}",
            self.account, filter, self.region
        )
    }

    pub fn describe(&self) -> String {
        match &self.filter {
            VpcFilter::Default => format!("default VPC in {}/{}", self.account, self.region),
            VpcFilter::Id(id) => format!("{} in {}/{}", id, self.account, self.region),
        }
    }
}

/// The parts of a VPC the stack uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcInfo {
    pub vpc_id: String,
    pub public_subnet_ids: Vec<String>,
    #[serde(default)]
    pub availability_zones: Vec<String>,
}

impl VpcInfo {
    fn ensure_load_balancer_capable(&self) -> Result<(), LookupError> {
        if self.public_subnet_ids.len() < MIN_PUBLIC_SUBNETS {
            return Err(LookupError::TooFewPublicSubnets {
                vpc_id: self.vpc_id.clone(),
                found: self.public_subnet_ids.len(),
            });
        }
        Ok(())
    }
}

/// Source of VPC information
#[async_trait]
pub trait VpcProvider: Send + Sync {
    async fn lookup(&self, query: &VpcQuery) -> Result<VpcInfo>;
}

/// Answer `query` from `cache`, falling back to `provider` and recording the result
pub async fn lookup_cached(
    query: &VpcQuery,
    cache: &mut ContextCache,
    provider: &dyn VpcProvider,
) -> Result<VpcInfo> {
    let key = query.context_key();

    if let Some(info) = cache.get::<VpcInfo>(&key)? {
        tracing::debug!(key = %key, vpc_id = %info.vpc_id, "Using cached VPC lookup");
        return Ok(info);
    }

    tracing::info!("Looking up {}", query.describe());
    let info = provider
        .lookup(query)
        .await
        .with_context(|| format!("Failed to look up {}", query.describe()))?;
    info.ensure_load_balancer_capable()?;

    cache.insert(&key, &info)?;
    cache.save()?;
    Ok(info)
}

/// Resolve the VPC the stack deploys into, per the network settings
pub async fn resolve_vpc(
    settings: &Settings,
    account: &str,
    cache: &mut ContextCache,
) -> Result<VpcInfo> {
    let filter = match &settings.network.lookup {
        VpcLookupSettings::Static {
            vpc_id,
            subnet_ids,
            availability_zones,
        } => {
            return Ok(VpcInfo {
                vpc_id: vpc_id.clone(),
                public_subnet_ids: subnet_ids.clone(),
                availability_zones: availability_zones.clone(),
            })
        }
        VpcLookupSettings::DefaultVpc => VpcFilter::Default,
        VpcLookupSettings::VpcId { vpc_id } => VpcFilter::Id(vpc_id.clone()),
    };

    let query = VpcQuery {
        account: account.to_string(),
        region: settings.stack.region.clone(),
        filter,
    };

    #[cfg(feature = "aws")]
    {
        let provider = aws::Ec2VpcProvider::new(&query.region).await;
        lookup_cached(&query, cache, &provider).await
    }

    #[cfg(not(feature = "aws"))]
    {
        let key = query.context_key();
        match cache.get::<VpcInfo>(&key)? {
            Some(info) => Ok(info),
            None => Err(LookupError::Unavailable(key).into()),
        }
    }
}

/// The account the stack deploys into.
///
/// Taken from settings when set, otherwise from the caller's credentials.
pub async fn resolve_account(settings: &Settings) -> Result<String> {
    if !settings.stack.account.is_empty() {
        return Ok(settings.stack.account.clone());
    }

    #[cfg(feature = "aws")]
    {
        aws::caller_account(&settings.stack.region).await
    }

    #[cfg(not(feature = "aws"))]
    {
        anyhow::bail!(
            "stack.account is not set. Set CDK_DEFAULT_ACCOUNT or STACK__STACK__ACCOUNT"
        )
    }
}
