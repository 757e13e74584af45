use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;

use super::{LookupError, VpcFilter, VpcInfo, VpcProvider, VpcQuery};

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let cut = (0..=200)
            .rev()
            .find(|i| debug_str.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &debug_str[..cut])
    } else {
        debug_str
    }
}

async fn load_config(region: &str) -> aws_config::SdkConfig {
    // Default credential chain (env vars, profile, IAM role)
    aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// Looks up VPCs and their public subnets with the EC2 API
pub struct Ec2VpcProvider {
    client: Ec2Client,
}

impl Ec2VpcProvider {
    pub async fn new(region: &str) -> Self {
        let config = load_config(region).await;
        Self {
            client: Ec2Client::new(&config),
        }
    }

    async fn find_vpc_id(&self, query: &VpcQuery) -> Result<String> {
        let filter = match &query.filter {
            VpcFilter::Default => Filter::builder().name("isDefault").values("true").build(),
            VpcFilter::Id(id) => Filter::builder().name("vpc-id").values(id).build(),
        };

        let response = self
            .client
            .describe_vpcs()
            .filters(filter)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to describe VPCs: {}", format_sdk_error(&e)))?;

        let vpc_ids: Vec<&str> = response
            .vpcs()
            .iter()
            .filter_map(|vpc| vpc.vpc_id())
            .collect();

        match vpc_ids.as_slice() {
            [] => Err(LookupError::NotFound(query.describe()).into()),
            [id] => Ok(id.to_string()),
            ids => Err(LookupError::Ambiguous {
                filter: query.describe(),
                count: ids.len(),
            }
            .into()),
        }
    }

    /// Subnets that auto-assign public IPs, sorted by availability zone
    async fn public_subnets(&self, vpc_id: &str) -> Result<Vec<(String, String)>> {
        let mut subnets = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .describe_subnets()
                .filters(Filter::builder().name("vpc-id").values(vpc_id).build());
            if let Some(token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.map_err(|e| {
                anyhow::anyhow!(
                    "Failed to describe subnets of {}: {}",
                    vpc_id,
                    format_sdk_error(&e)
                )
            })?;

            for subnet in response.subnets() {
                if subnet.map_public_ip_on_launch() != Some(true) {
                    continue;
                }
                if let (Some(id), Some(az)) = (subnet.subnet_id(), subnet.availability_zone()) {
                    subnets.push((az.to_string(), id.to_string()));
                }
            }

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        subnets.sort();
        Ok(subnets)
    }
}

#[async_trait]
impl VpcProvider for Ec2VpcProvider {
    async fn lookup(&self, query: &VpcQuery) -> Result<VpcInfo> {
        let vpc_id = self.find_vpc_id(query).await?;
        let subnets = self.public_subnets(&vpc_id).await?;

        tracing::info!(
            "Found VPC {} with {} public subnets",
            vpc_id,
            subnets.len()
        );

        let mut availability_zones: Vec<String> =
            subnets.iter().map(|(az, _)| az.clone()).collect();
        availability_zones.dedup();

        Ok(VpcInfo {
            vpc_id,
            public_subnet_ids: subnets.into_iter().map(|(_, id)| id).collect(),
            availability_zones,
        })
    }
}

/// Account id of the credentials in use
pub async fn caller_account(region: &str) -> Result<String> {
    let config = load_config(region).await;
    let client = aws_sdk_sts::Client::new(&config);

    let identity = client
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to resolve the AWS account (set stack.account to skip): {}",
                format_sdk_error(&e)
            )
        })?;

    let account = identity
        .account()
        .context("GetCallerIdentity returned no account")?
        .to_string();

    tracing::debug!("Resolved account {} from caller identity", account);
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct FakeError {
        message: Option<String>,
    }

    #[test]
    fn test_format_sdk_error_extracts_message() {
        let err = FakeError {
            message: Some("You are not authorized".to_string()),
        };
        assert_eq!(format_sdk_error(&err), "You are not authorized");
    }

    #[test]
    fn test_format_sdk_error_truncates_long_output() {
        let err = FakeError {
            message: None,
        };
        let formatted = format_sdk_error(&vec![&err; 20]);
        assert!(formatted.ends_with("..."));
        assert!(formatted.len() <= 203);
    }
}
