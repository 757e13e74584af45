use serde_json::json;

use super::{iam, Ids};
use crate::lookup::VpcInfo;
use crate::settings::{RegistrySettings, ServiceSettings};
use crate::template::intrinsic::{self, get_att, reference, sub};
use crate::template::{DeletionPolicy, Resource, Template, TemplateError};

/// Role ECS assumes to pull the image and ship logs. Also the principal of
/// the registry policy, so first pulls can populate the cache.
pub(super) fn declare_execution_role(
    template: &mut Template,
    ids: &Ids,
    registry: &RegistrySettings,
) -> Result<(), TemplateError> {
    template.add(
        ids.execution_role.as_str(),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": iam::ecs_tasks_trust_policy(),
                "ManagedPolicyArns": [sub(iam::TASK_EXECUTION_MANAGED_POLICY)],
                "Policies": [
                    {
                        "PolicyName": "PullThroughCacheImport",
                        "PolicyDocument": iam::pull_through_identity_policy(&registry.repository_prefix),
                    }
                ],
            }),
        ),
    )?;
    Ok(())
}

pub(super) fn declare_cluster(template: &mut Template, ids: &Ids) -> Result<(), TemplateError> {
    template.add(
        ids.cluster.as_str(),
        Resource::new(
            "AWS::ECS::Cluster",
            json!({
                "ClusterSettings": [{ "Name": "containerInsights", "Value": "disabled" }],
            }),
        ),
    )?;
    Ok(())
}

/// Fargate task running the mirrored image, plus its log group
pub(super) fn declare_task_definition(
    template: &mut Template,
    ids: &Ids,
    stack_name: &str,
    registry: &RegistrySettings,
    service: &ServiceSettings,
) -> Result<(), TemplateError> {
    template.add(
        ids.log_group.as_str(),
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({ "RetentionInDays": service.log_retention_days }),
        )
        .deletion_policy(DeletionPolicy::Delete),
    )?;

    // Pulling through the repository URI is what triggers the cache
    let image = sub(format!("${{{}.RepositoryUri}}:{}", ids.repository, registry.tag));

    template.add(
        ids.task_definition.as_str(),
        Resource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": format!("{}-{}", stack_name, service.container_name),
                "RequiresCompatibilities": ["FARGATE"],
                "NetworkMode": "awsvpc",
                "Cpu": service.cpu.to_string(),
                "Memory": service.memory_mib.to_string(),
                "ExecutionRoleArn": get_att(&ids.execution_role, "Arn"),
                "RuntimePlatform": {
                    "CpuArchitecture": "X86_64",
                    "OperatingSystemFamily": "LINUX"
                },
                "ContainerDefinitions": [
                    {
                        "Name": service.container_name,
                        "Image": image,
                        "Essential": true,
                        "PortMappings": [
                            { "ContainerPort": service.container_port, "Protocol": "tcp" }
                        ],
                        "LogConfiguration": {
                            "LogDriver": "awslogs",
                            "Options": {
                                "awslogs-group": reference(&ids.log_group),
                                "awslogs-region": reference(intrinsic::REGION),
                                "awslogs-stream-prefix": service.container_name
                            }
                        }
                    }
                ],
            }),
        ),
    )?;
    Ok(())
}

/// The Fargate service.
///
/// Nothing in its properties points at the registry policy, yet its first
/// image pull fails unless the policy is in effect, hence the explicit edge.
/// The listener edge makes sure the target group is attached to a load
/// balancer before ECS registers tasks with it.
pub(super) fn declare_service(
    template: &mut Template,
    ids: &Ids,
    service: &ServiceSettings,
    vpc: &VpcInfo,
) -> Result<(), TemplateError> {
    template.add(
        ids.service.as_str(),
        Resource::new(
            "AWS::ECS::Service",
            json!({
                "Cluster": reference(&ids.cluster),
                "LaunchType": "FARGATE",
                "TaskDefinition": reference(&ids.task_definition),
                "DesiredCount": service.desired_count,
                "HealthCheckGracePeriodSeconds": 60,
                "DeploymentConfiguration": {
                    "MaximumPercent": 200,
                    "MinimumHealthyPercent": 50
                },
                "NetworkConfiguration": {
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "ENABLED",
                        "Subnets": vpc.public_subnet_ids,
                        "SecurityGroups": [get_att(&ids.service_security_group, "GroupId")]
                    }
                },
                "LoadBalancers": [
                    {
                        "ContainerName": service.container_name,
                        "ContainerPort": service.container_port,
                        "TargetGroupArn": reference(&ids.target_group)
                    }
                ],
            }),
        )
        .depends_on(&ids.registry_policy)
        .depends_on(&ids.listener),
    )?;
    Ok(())
}
