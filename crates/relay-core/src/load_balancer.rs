//! Network load balancer, its security group, target group and TCP listener.

use crate::error::Result;
use crate::network::{Cidr, NetworkRefs};
use crate::template::{get_att, ref_to, Resource, Template};
use crate::types::LoadBalancerScheme;
use serde_json::{json, Value};

pub const SECURITY_GROUP_ID: &str = "NlbSecurityGroup";
pub const LOAD_BALANCER_ID: &str = "Nlb";
pub const TARGET_GROUP_ID: &str = "NlbTargetGroup";
pub const LISTENER_ID: &str = "NlbListener";

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerRefs {
    pub security_group_id: Value,
    pub target_group_arn: Value,
    pub listener: String,
    /// Normalized client CIDRs the security group admits.
    pub clients: Vec<Cidr>,
}

/// Parse the allowed clients, dropping repeats but keeping order.
pub fn client_cidrs(clients: &[String]) -> Result<Vec<Cidr>> {
    let mut cidrs: Vec<Cidr> = Vec::with_capacity(clients.len());
    for client in clients {
        let cidr: Cidr = client.parse()?;
        if !cidrs.contains(&cidr) {
            cidrs.push(cidr);
        }
    }
    Ok(cidrs)
}

pub(crate) fn allow_all_outbound() -> Value {
    json!([{
        "CidrIp": "0.0.0.0/0",
        "Description": "Allow all outbound traffic by default",
        "IpProtocol": "-1",
    }])
}

pub fn declare_load_balancer(
    template: &mut Template,
    public: bool,
    allowed_clients: &[String],
    network: &NetworkRefs,
    port: u16,
) -> Result<LoadBalancerRefs> {
    let clients = client_cidrs(allowed_clients)?;
    let ingress: Vec<Value> = clients
        .iter()
        .map(|cidr| {
            json!({
                "CidrIp": cidr.to_string(),
                "Description": format!("Allow from {cidr}"),
                "FromPort": port,
                "IpProtocol": "tcp",
                "ToPort": port,
            })
        })
        .collect();

    template.add(
        SECURITY_GROUP_ID,
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Allow access to SES Relay",
                "VpcId": network.vpc_id,
                "SecurityGroupEgress": allow_all_outbound(),
                "SecurityGroupIngress": ingress,
            }),
        ),
    )?;

    let scheme = LoadBalancerScheme::from_public(public);
    let subnets = match scheme {
        LoadBalancerScheme::InternetFacing => &network.public_subnets,
        LoadBalancerScheme::Internal => &network.private_subnets,
    };
    let mut nlb = Resource::new(
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "Type": "network",
            "Scheme": scheme.as_str(),
            "Subnets": subnets,
            "SecurityGroups": [get_att(SECURITY_GROUP_ID, "GroupId")],
            "LoadBalancerAttributes": [
                { "Key": "deletion_protection.enabled", "Value": "false" }
            ],
        }),
    );
    if scheme == LoadBalancerScheme::InternetFacing {
        for route in &network.internet_routes {
            nlb = nlb.depends_on(route);
        }
    }
    template.add(LOAD_BALANCER_ID, nlb)?;

    template.add(
        TARGET_GROUP_ID,
        Resource::new(
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            json!({
                "Port": port,
                "Protocol": "TCP",
                "TargetType": "ip",
                "VpcId": network.vpc_id,
            }),
        ),
    )?;

    template.add(
        LISTENER_ID,
        Resource::new(
            "AWS::ElasticLoadBalancingV2::Listener",
            json!({
                "LoadBalancerArn": ref_to(LOAD_BALANCER_ID),
                "Port": port,
                "Protocol": "TCP",
                "DefaultActions": [
                    { "Type": "forward", "TargetGroupArn": ref_to(TARGET_GROUP_ID) }
                ],
            }),
        ),
    )?;

    tracing::debug!(scheme = %scheme, port, "declared network load balancer");
    Ok(LoadBalancerRefs {
        security_group_id: get_att(SECURITY_GROUP_ID, "GroupId"),
        target_group_arn: ref_to(TARGET_GROUP_ID),
        listener: LISTENER_ID.to_string(),
        clients,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
