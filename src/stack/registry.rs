use serde_json::json;

use super::{iam, Ids};
use crate::env::DockerHubCredentials;
use crate::settings::RegistrySettings;
use crate::template::intrinsic::{get_att, reference};
use crate::template::{DeletionPolicy, Resource, Template, TemplateError};

/// Secret holding the upstream credentials, in the shape ECR expects
pub(super) fn declare_secret(
    template: &mut Template,
    ids: &Ids,
    registry: &RegistrySettings,
    credentials: &DockerHubCredentials,
) -> Result<(), TemplateError> {
    let secret_string = json!({
        "username": credentials.username,
        "accessToken": credentials.access_token,
    })
    .to_string();

    template.add(
        ids.secret.as_str(),
        Resource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Name": registry.secret_name,
                "Description": format!(
                    "Credentials for the {} pull-through cache",
                    registry.upstream_registry
                ),
                "SecretString": secret_string,
            }),
        )
        .deletion_policy(DeletionPolicy::Delete),
    )?;
    Ok(())
}

/// Cache rule, the registry policy that lets the execution role use it, and
/// the mirrored repository
pub(super) fn declare_cache(
    template: &mut Template,
    ids: &Ids,
    registry: &RegistrySettings,
) -> Result<(), TemplateError> {
    // CredentialArn is a reference, so the secret is created first
    template.add(
        ids.cache_rule.as_str(),
        Resource::new(
            "AWS::ECR::PullThroughCacheRule",
            json!({
                "EcrRepositoryPrefix": registry.repository_prefix,
                "UpstreamRegistry": registry.upstream_registry,
                "UpstreamRegistryUrl": registry.upstream_registry_url,
                "CredentialArn": reference(&ids.secret),
            }),
        ),
    )?;

    template.add(
        ids.registry_policy.as_str(),
        Resource::new(
            "AWS::ECR::RegistryPolicy",
            json!({
                "PolicyText": iam::pull_through_registry_policy(
                    get_att(&ids.execution_role, "Arn"),
                    &registry.repository_prefix,
                ),
            }),
        ),
    )?;

    // Never pushed to; the first pull through the cache fills it
    template.add(
        ids.repository.as_str(),
        Resource::new(
            "AWS::ECR::Repository",
            json!({
                "RepositoryName": registry.repository_name(),
                "EmptyOnDelete": true,
                "ImageScanningConfiguration": { "ScanOnPush": true },
            }),
        )
        .deletion_policy(DeletionPolicy::Delete),
    )?;

    Ok(())
}
