//! IAM policy documents used by the stack.

use serde_json::{json, Value};

use crate::template::intrinsic::sub;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Actions the pull-through cache needs from whoever triggers the first pull:
/// creating the mirrored repository and importing the upstream image into it
pub const PULL_THROUGH_ACTIONS: [&str; 2] =
    ["ecr:CreateRepository", "ecr:BatchImportUpstreamImage"];

/// AWS managed policy granting ECR pulls and CloudWatch Logs writes
pub const TASK_EXECUTION_MANAGED_POLICY: &str =
    "arn:${AWS::Partition}:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

/// Trust policy letting ECS tasks assume a role
pub fn ecs_tasks_trust_policy() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }
        ]
    })
}

/// ARN pattern covering every repository under `prefix` in the stack's account and region
pub fn cache_repositories_arn(prefix: &str) -> Value {
    sub(format!(
        "arn:${{AWS::Partition}}:ecr:${{AWS::Region}}:${{AWS::AccountId}}:repository/{}/*",
        prefix
    ))
}

/// Identity policy for the execution role
pub fn pull_through_identity_policy(prefix: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Action": PULL_THROUGH_ACTIONS,
                "Resource": cache_repositories_arn(prefix)
            }
        ]
    })
}

/// Registry-level policy allowing `principal` to populate the cache namespace
pub fn pull_through_registry_policy(principal: Value, prefix: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Sid": "AllowPullThroughCacheImport",
                "Effect": "Allow",
                "Principal": { "AWS": principal },
                "Action": PULL_THROUGH_ACTIONS,
                "Resource": cache_repositories_arn(prefix)
            }
        ]
    })
}
