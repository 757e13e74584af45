//! The NGINX pull-through stack.
//!
//! [`assemble`] declares every resource in a fixed order. Edges the template
//! cannot infer from references (the registry policy before the service) are
//! declared explicitly.

mod compute;
pub mod iam;
mod network;
mod registry;

use crate::env::DockerHubCredentials;
use crate::lookup::VpcInfo;
use crate::settings::Settings;
use crate::template::intrinsic::{self, get_att, reference, sub};
use crate::template::{LogicalId, Output, Template, TemplateError};

/// Logical ids of every resource in the stack.
///
/// Built up front so resources can refer to ones declared after them, like
/// the listener forwarding to the target group.
pub struct Ids {
    pub secret: LogicalId,
    pub lb_security_group: LogicalId,
    pub load_balancer: LogicalId,
    pub listener: LogicalId,
    pub execution_role: LogicalId,
    pub cache_rule: LogicalId,
    pub registry_policy: LogicalId,
    pub repository: LogicalId,
    pub cluster: LogicalId,
    pub log_group: LogicalId,
    pub task_definition: LogicalId,
    pub service_security_group: LogicalId,
    pub service: LogicalId,
    pub target_group: LogicalId,
    pub service_ingress: LogicalId,
    pub lb_egress: LogicalId,
}

impl Ids {
    pub fn new() -> Result<Self, TemplateError> {
        Ok(Self {
            secret: LogicalId::new("DockerHubSecret")?,
            lb_security_group: LogicalId::new("LoadBalancerSecurityGroup")?,
            load_balancer: LogicalId::new("LoadBalancer")?,
            listener: LogicalId::new("Listener")?,
            execution_role: LogicalId::new("ExecutionRole")?,
            cache_rule: LogicalId::new("PullThroughCacheRule")?,
            registry_policy: LogicalId::new("RegistryPolicy")?,
            repository: LogicalId::new("NginxRepository")?,
            cluster: LogicalId::new("Cluster")?,
            log_group: LogicalId::new("LogGroup")?,
            task_definition: LogicalId::new("TaskDefinition")?,
            service_security_group: LogicalId::new("ServiceSecurityGroup")?,
            service: LogicalId::new("Service")?,
            target_group: LogicalId::new("TargetGroup")?,
            service_ingress: LogicalId::new("ServiceIngressFromLoadBalancer")?,
            lb_egress: LogicalId::new("LoadBalancerEgressToService")?,
        })
    }
}

/// Declare the whole stack.
///
/// Pure: no I/O happens here. The returned template has already passed
/// [`Template::validate`].
pub fn assemble(
    credentials: &DockerHubCredentials,
    settings: &Settings,
    vpc: &VpcInfo,
) -> Result<Template, TemplateError> {
    let ids = Ids::new()?;
    let mut template = Template::new(settings.stack.description.clone());

    registry::declare_secret(&mut template, &ids, &settings.registry, credentials)?;
    network::declare_load_balancer(&mut template, &ids, &settings.service, vpc)?;
    compute::declare_execution_role(&mut template, &ids, &settings.registry)?;
    registry::declare_cache(&mut template, &ids, &settings.registry)?;
    compute::declare_cluster(&mut template, &ids)?;
    compute::declare_task_definition(
        &mut template,
        &ids,
        &settings.stack.name,
        &settings.registry,
        &settings.service,
    )?;
    network::declare_service_security_group(&mut template, &ids, vpc)?;
    compute::declare_service(&mut template, &ids, &settings.service, vpc)?;
    network::declare_target_group(&mut template, &ids, &settings.service, vpc)?;
    network::declare_access_rules(&mut template, &ids, &settings.service)?;

    declare_outputs(&mut template, &ids, settings)?;

    template.validate()?;
    tracing::info!(
        stack = %settings.stack.name,
        resources = template.len(),
        "Assembled stack"
    );
    Ok(template)
}

fn declare_outputs(
    template: &mut Template,
    ids: &Ids,
    settings: &Settings,
) -> Result<(), TemplateError> {
    template.add_output(
        "LoadBalancerDns",
        Output::new(get_att(&ids.load_balancer, "DNSName"))
            .description("Public DNS name of the load balancer")
            .export(sub(format!("${{{}}}-LoadBalancerDns", intrinsic::STACK_NAME))),
    )?;

    let url = if settings.service.listener_port == 80 {
        format!("http://${{{}.DNSName}}", ids.load_balancer)
    } else {
        format!(
            "http://${{{}.DNSName}}:{}",
            ids.load_balancer, settings.service.listener_port
        )
    };
    template.add_output(
        "ServiceUrl",
        Output::new(sub(url)).description("URL serving the NGINX welcome page"),
    )?;

    template.add_output(
        "RepositoryUri",
        Output::new(get_att(&ids.repository, "RepositoryUri"))
            .description("Pull-through cache repository the service pulls from"),
    )?;

    template.add_output(
        "ServiceName",
        Output::new(get_att(&ids.service, "Name")).description("ECS service name"),
    )?;

    template.add_output(
        "ClusterName",
        Output::new(reference(&ids.cluster)).description("ECS cluster running the service"),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env;
    use crate::template::graph::EdgeKind;
    use crate::template::Format;
    use serde_json::{json, Value};

    fn credentials() -> DockerHubCredentials {
        let vars = env::validate_with(&env::REQUIRED_ENV_VARS, |key| match key {
            "DOCKERHUB_USERNAME" => Some("alice".to_string()),
            "DOCKERHUB_ACCESS_TOKEN" => Some("tok123".to_string()),
            _ => None,
        })
        .unwrap();
        DockerHubCredentials::try_from(vars).unwrap()
    }

    fn vpc() -> VpcInfo {
        VpcInfo {
            vpc_id: "vpc-0abc".to_string(),
            public_subnet_ids: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            availability_zones: vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
        }
    }

    fn stack() -> (Template, Ids) {
        let template = assemble(&credentials(), &Settings::for_tests(), &vpc()).unwrap();
        (template, Ids::new().unwrap())
    }

    #[test]
    fn test_service_depends_on_registry_policy_explicitly() {
        let (template, ids) = stack();

        let deps = template.dependencies(&ids.service);

        assert!(deps.contains(&(ids.registry_policy.clone(), EdgeKind::Explicit)));
        assert!(template.depends_on(&ids.service, &ids.registry_policy));
    }

    #[test]
    fn test_service_is_reachable_only_from_load_balancer() {
        let (template, ids) = stack();
        let service_sg = template.get(&ids.service_security_group).unwrap();
        assert!(service_sg.property("SecurityGroupIngress").is_none());

        let service_group = get_att(&ids.service_security_group, "GroupId");
        let ingress: Vec<&Value> = template
            .resources_of_type("AWS::EC2::SecurityGroupIngress")
            .map(|(_, resource)| &resource.properties)
            .filter(|props| props["GroupId"] == service_group)
            .collect();

        assert_eq!(ingress.len(), 1);
        let rule = ingress[0];
        assert_eq!(
            rule["SourceSecurityGroupId"],
            get_att(&ids.lb_security_group, "GroupId")
        );
        assert!(rule.get("CidrIp").is_none());
        assert_eq!(rule["FromPort"], 80);
        assert_eq!(rule["ToPort"], 80);
    }

    #[test]
    fn test_only_load_balancer_is_open_to_the_internet() {
        let (template, ids) = stack();

        let open: Vec<&LogicalId> = template
            .resources_of_type("AWS::EC2::SecurityGroup")
            .filter(|(_, resource)| {
                resource
                    .property("SecurityGroupIngress")
                    .and_then(Value::as_array)
                    .map(|rules| rules.iter().any(|r| r["CidrIp"] == "0.0.0.0/0"))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect();

        assert_eq!(open, vec![&ids.lb_security_group]);
    }

    #[test]
    fn test_deployment_order() {
        let (template, ids) = stack();
        let order = template.deployment_order().unwrap();
        let position = |id: &LogicalId| order.iter().position(|o| o == id).unwrap();

        assert_eq!(order.len(), template.len());
        assert!(position(&ids.secret) < position(&ids.cache_rule));
        assert!(position(&ids.execution_role) < position(&ids.registry_policy));
        assert!(position(&ids.registry_policy) < position(&ids.service));
        assert!(position(&ids.listener) < position(&ids.service));
        assert!(position(&ids.target_group) < position(&ids.listener));
    }

    #[test]
    fn test_execution_role_is_shared() {
        let (template, ids) = stack();
        let role_arn = get_att(&ids.execution_role, "Arn");

        let policy = template.get(&ids.registry_policy).unwrap();
        assert_eq!(
            policy.properties["PolicyText"]["Statement"][0]["Principal"]["AWS"],
            role_arn
        );

        let task = template.get(&ids.task_definition).unwrap();
        assert_eq!(task.properties["ExecutionRoleArn"], role_arn);
    }

    #[test]
    fn test_cache_rule_uses_secret_and_prefix() {
        let (template, ids) = stack();

        let rule = template.get(&ids.cache_rule).unwrap();
        assert_eq!(rule.properties["CredentialArn"], reference(&ids.secret));
        assert_eq!(rule.properties["EcrRepositoryPrefix"], "docker-hub");
        assert_eq!(rule.properties["UpstreamRegistryUrl"], "registry-1.docker.io");

        let repository = template.get(&ids.repository).unwrap();
        assert_eq!(repository.properties["RepositoryName"], "docker-hub/library/nginx");
    }

    #[test]
    fn test_secret_carries_credentials() {
        let (template, ids) = stack();

        let secret = template.get(&ids.secret).unwrap();
        assert_eq!(secret.properties["Name"], "ecr-pullthroughcache/docker-hub");

        let payload: Value =
            serde_json::from_str(secret.properties["SecretString"].as_str().unwrap()).unwrap();
        assert_eq!(payload, json!({ "username": "alice", "accessToken": "tok123" }));
    }

    #[test]
    fn test_task_pulls_through_the_cache_repository() {
        let (template, ids) = stack();

        let task = template.get(&ids.task_definition).unwrap();
        let container = &task.properties["ContainerDefinitions"][0];
        assert_eq!(
            container["Image"],
            json!({ "Fn::Sub": "${NginxRepository.RepositoryUri}:latest" })
        );
        assert_eq!(task.properties["Cpu"], "256");
        assert_eq!(task.properties["Memory"], "512");
        assert!(template.depends_on(&ids.task_definition, &ids.repository));
    }

    #[test]
    fn test_alice_renders() {
        let (template, _) = stack();

        let rendered = template.render(Format::Json).unwrap();

        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["Resources"].as_object().unwrap().len(), 16);
        assert_eq!(
            value["Resources"]["Service"]["DependsOn"],
            json!(["RegistryPolicy", "Listener"])
        );
        assert_eq!(
            value["Outputs"]["LoadBalancerDns"]["Export"]["Name"],
            json!({ "Fn::Sub": "${AWS::StackName}-LoadBalancerDns" })
        );
        assert_eq!(
            value["Outputs"]["ServiceUrl"]["Value"],
            json!({ "Fn::Sub": "http://${LoadBalancer.DNSName}" })
        );
    }

    #[test]
    fn test_every_output_is_described() {
        let (template, _) = stack();

        let names: Vec<&str> = template.outputs().map(|(id, _)| id.as_str()).collect();
        assert_eq!(
            names,
            vec!["LoadBalancerDns", "ServiceUrl", "RepositoryUri", "ServiceName", "ClusterName"]
        );
        assert!(template
            .outputs()
            .all(|(_, output)| output.description.is_some()));
    }

    #[test]
    fn test_listener_port_shows_in_service_url() {
        let mut settings = Settings::for_tests();
        settings.service.listener_port = 8080;

        let template = assemble(&credentials(), &settings, &vpc()).unwrap();

        let (_, url) = template
            .outputs()
            .find(|(id, _)| id.as_str() == "ServiceUrl")
            .unwrap();
        assert_eq!(
            url.value,
            json!({ "Fn::Sub": "http://${LoadBalancer.DNSName}:8080" })
        );
    }
}
