use serde_json::json;

use super::Ids;
use crate::lookup::VpcInfo;
use crate::settings::ServiceSettings;
use crate::template::intrinsic::{get_att, reference};
use crate::template::{Resource, Template, TemplateError};

/// Replaces the implicit allow-all egress rule of a new security group.
/// Matches no real traffic.
fn disallow_all_egress() -> serde_json::Value {
    json!({
        "CidrIp": "255.255.255.255/32",
        "IpProtocol": "icmp",
        "FromPort": 252,
        "ToPort": 86,
        "Description": "Disallow all traffic"
    })
}

/// Internet-facing load balancer, its security group and HTTP listener
pub(super) fn declare_load_balancer(
    template: &mut Template,
    ids: &Ids,
    service: &ServiceSettings,
    vpc: &VpcInfo,
) -> Result<(), TemplateError> {
    template.add(
        ids.lb_security_group.as_str(),
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Load balancer for the NGINX service",
                "VpcId": vpc.vpc_id,
                "SecurityGroupIngress": [
                    {
                        "CidrIp": "0.0.0.0/0",
                        "IpProtocol": "tcp",
                        "FromPort": service.listener_port,
                        "ToPort": service.listener_port,
                        "Description": format!("Allow from anyone on port {}", service.listener_port)
                    }
                ],
                "SecurityGroupEgress": [disallow_all_egress()],
            }),
        ),
    )?;

    template.add(
        ids.load_balancer.as_str(),
        Resource::new(
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
            json!({
                "Type": "application",
                "Scheme": "internet-facing",
                "Subnets": vpc.public_subnet_ids,
                "SecurityGroups": [get_att(&ids.lb_security_group, "GroupId")],
                "LoadBalancerAttributes": [
                    { "Key": "deletion_protection.enabled", "Value": "false" }
                ],
            }),
        ),
    )?;

    template.add(
        ids.listener.as_str(),
        Resource::new(
            "AWS::ElasticLoadBalancingV2::Listener",
            json!({
                "LoadBalancerArn": reference(&ids.load_balancer),
                "Port": service.listener_port,
                "Protocol": "HTTP",
                "DefaultActions": [
                    { "Type": "forward", "TargetGroupArn": reference(&ids.target_group) }
                ],
            }),
        ),
    )?;

    Ok(())
}

/// Security group of the service tasks. Carries no inline ingress; the only
/// way in is the rule from [`declare_access_rules`].
pub(super) fn declare_service_security_group(
    template: &mut Template,
    ids: &Ids,
    vpc: &VpcInfo,
) -> Result<(), TemplateError> {
    // Egress stays open: tasks pull their image from ECR over the internet
    template.add(
        ids.service_security_group.as_str(),
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "NGINX service tasks",
                "VpcId": vpc.vpc_id,
                "SecurityGroupEgress": [
                    {
                        "CidrIp": "0.0.0.0/0",
                        "IpProtocol": "-1",
                        "Description": "Allow all outbound traffic by default"
                    }
                ],
            }),
        ),
    )?;
    Ok(())
}

pub(super) fn declare_target_group(
    template: &mut Template,
    ids: &Ids,
    service: &ServiceSettings,
    vpc: &VpcInfo,
) -> Result<(), TemplateError> {
    template.add(
        ids.target_group.as_str(),
        Resource::new(
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            json!({
                "VpcId": vpc.vpc_id,
                "TargetType": "ip",
                "Port": service.container_port,
                "Protocol": "HTTP",
                "HealthCheckProtocol": "HTTP",
                "HealthCheckPath": service.health_check_path,
                "Matcher": { "HttpCode": "200" },
                "TargetGroupAttributes": [
                    { "Key": "deregistration_delay.timeout_seconds", "Value": "30" }
                ],
            }),
        ),
    )?;
    Ok(())
}

/// Load balancer to service on the container port, and nothing else
pub(super) fn declare_access_rules(
    template: &mut Template,
    ids: &Ids,
    service: &ServiceSettings,
) -> Result<(), TemplateError> {
    let description = format!("Load balancer to service on port {}", service.container_port);

    template.add(
        ids.service_ingress.as_str(),
        Resource::new(
            "AWS::EC2::SecurityGroupIngress",
            json!({
                "GroupId": get_att(&ids.service_security_group, "GroupId"),
                "SourceSecurityGroupId": get_att(&ids.lb_security_group, "GroupId"),
                "IpProtocol": "tcp",
                "FromPort": service.container_port,
                "ToPort": service.container_port,
                "Description": description,
            }),
        ),
    )?;

    template.add(
        ids.lb_egress.as_str(),
        Resource::new(
            "AWS::EC2::SecurityGroupEgress",
            json!({
                "GroupId": get_att(&ids.lb_security_group, "GroupId"),
                "DestinationSecurityGroupId": get_att(&ids.service_security_group, "GroupId"),
                "IpProtocol": "tcp",
                "FromPort": service.container_port,
                "ToPort": service.container_port,
                "Description": description,
            }),
        ),
    )?;

    Ok(())
}
