//! ECS cluster, Fargate task definition, IAM roles and the relay service.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::load_balancer::{allow_all_outbound, LoadBalancerRefs};
use crate::network::{Cidr, NetworkRefs};
use crate::template::{get_att, ref_to, sub, Resource, Template};
use serde_json::{json, Value};

pub const CLUSTER_ID: &str = "EcsCluster";
pub const LOG_GROUP_ID: &str = "RelayLogGroup";
pub const EXECUTION_ROLE_ID: &str = "TaskExecutionRole";
pub const EXECUTION_POLICY_ID: &str = "TaskExecutionRoleDefaultPolicy";
pub const TASK_ROLE_ID: &str = "TaskRole";
pub const TASK_POLICY_ID: &str = "TaskRoleDefaultPolicy";
pub const TASK_DEFINITION_ID: &str = "TaskDefinition";
pub const SERVICE_SECURITY_GROUP_ID: &str = "ServiceSecurityGroup";
pub const SERVICE_INGRESS_ID: &str = "ServiceSecurityGroupFromNlb";
pub const SERVICE_ID: &str = "Service";

pub const USERNAME_SECRET_ENV: &str = "SES_SMTP_USERNAME";
pub const PASSWORD_SECRET_ENV: &str = "SES_SMTP_PASSWORD";

// ---------------------------------------------------------------------------
// Fargate sizing
// ---------------------------------------------------------------------------

/// Whether `cpu` units and `memory_mib` form a Fargate task size.
pub fn is_valid_fargate_size(cpu: u32, memory_mib: u32) -> bool {
    let (min, max, step) = match cpu {
        256 => return matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024, 4096, 1024),
        1024 => (2048, 8192, 1024),
        2048 => (4096, 16384, 1024),
        4096 => (8192, 30720, 1024),
        8192 => (16384, 61440, 4096),
        16384 => (32768, 122880, 8192),
        _ => return false,
    };
    (min..=max).contains(&memory_mib) && (memory_mib - min) % step == 0
}

// ---------------------------------------------------------------------------
// Secrets and environment
// ---------------------------------------------------------------------------

/// ECS `ValueFrom` selecting one JSON field of a Secrets Manager secret.
pub fn secret_value_from(secret_arn: &str, json_key: &str) -> String {
    format!("{secret_arn}:{json_key}::")
}

/// Plain environment handed to the relay container, sorted by name.
/// `clients` is the same normalized list the load balancer admits.
pub fn container_environment(config: &RelayConfig, clients: &[Cidr]) -> Vec<(String, String)> {
    let helo = if config.relay.helo.enabled { "True" } else { "False" };
    let clients: Vec<String> = clients.iter().map(Cidr::to_string).collect();
    let mut env = vec![
        ("ALLOWED_CLIENTS".to_string(), clients.join(" ")),
        (
            "ALLOWED_HELO_DOMAINS".to_string(),
            config.relay.helo.allowed_domains.join(" "),
        ),
        ("ENABLE_HELO_DOMAIN_RESTRICTIONS".to_string(), helo.to_string()),
        ("POSTFIX_SMTP_PORT".to_string(), config.relay.smtp_port.to_string()),
        ("SES_SMTP_ENDPOINT".to_string(), config.relay.ses_smtp_endpoint.clone()),
    ];
    env.sort();
    env
}

/// Secret-backed environment: name → `ValueFrom`.
pub fn container_secrets(config: &RelayConfig) -> Vec<(String, String)> {
    vec![
        (
            PASSWORD_SECRET_ENV.to_string(),
            secret_value_from(&config.secret.arn, &config.secret.password_key),
        ),
        (
            USERNAME_SECRET_ENV.to_string(),
            secret_value_from(&config.secret.arn, &config.secret.username_key),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

pub fn declare_cluster(template: &mut Template) -> Result<Value> {
    template.add(CLUSTER_ID, Resource::new("AWS::ECS::Cluster", json!({})))?;
    Ok(ref_to(CLUSTER_ID))
}

fn assume_role(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service },
        }],
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRefs {
    pub service_id: String,
    pub cluster_id: String,
}

/// Declare the task definition, its roles and logs, and the Fargate service
/// behind the load balancer.
pub fn declare_service(
    template: &mut Template,
    config: &RelayConfig,
    cluster: &Value,
    network: &NetworkRefs,
    lb: &LoadBalancerRefs,
    image_uri: &str,
) -> Result<ServiceRefs> {
    let stack_name = &config.app.name;
    let port = config.relay.smtp_port;
    let task = &config.task;

    let mut log_props = json!({});
    if let Some(days) = task.log_retention_days {
        log_props["RetentionInDays"] = json!(days);
    }
    template.add(
        LOG_GROUP_ID,
        Resource::new("AWS::Logs::LogGroup", log_props).retain(),
    )?;

    // Execution role: image pull, log delivery and the one secret.
    template.add(
        EXECUTION_ROLE_ID,
        Resource::new(
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role("ecs-tasks.amazonaws.com") }),
        ),
    )?;
    let repository_arn = sub(&format!(
        "arn:${{AWS::Partition}}:ecr:${{AWS::Region}}:${{AWS::AccountId}}:repository/{}",
        config.image.repository
    ));
    template.add(
        EXECUTION_POLICY_ID,
        Resource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyName": format!("{stack_name}TaskExecutionPolicy"),
                "Roles": [ref_to(EXECUTION_ROLE_ID)],
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [
                        {
                            "Action": [
                                "ecr:BatchCheckLayerAvailability",
                                "ecr:BatchGetImage",
                                "ecr:GetDownloadUrlForLayer",
                            ],
                            "Effect": "Allow",
                            "Resource": repository_arn,
                        },
                        {
                            "Action": "ecr:GetAuthorizationToken",
                            "Effect": "Allow",
                            "Resource": "*",
                        },
                        {
                            "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
                            "Effect": "Allow",
                            "Resource": get_att(LOG_GROUP_ID, "Arn"),
                        },
                        {
                            "Action": [
                                "secretsmanager:DescribeSecret",
                                "secretsmanager:GetSecretValue",
                            ],
                            "Effect": "Allow",
                            "Resource": config.secret.arn,
                        },
                    ],
                },
            }),
        ),
    )?;

    template.add(
        TASK_ROLE_ID,
        Resource::new(
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role("ecs-tasks.amazonaws.com") }),
        ),
    )?;
    if task.enable_exec_command {
        template.add(
            TASK_POLICY_ID,
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": format!("{stack_name}TaskPolicy"),
                    "Roles": [ref_to(TASK_ROLE_ID)],
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Action": [
                                "ssmmessages:CreateControlChannel",
                                "ssmmessages:CreateDataChannel",
                                "ssmmessages:OpenControlChannel",
                                "ssmmessages:OpenDataChannel",
                            ],
                            "Effect": "Allow",
                            "Resource": "*",
                        }],
                    },
                }),
            ),
        )?;
    }

    let environment: Vec<Value> = container_environment(config, &lb.clients)
        .into_iter()
        .map(|(name, value)| json!({ "Name": name, "Value": value }))
        .collect();
    let secrets: Vec<Value> = container_secrets(config)
        .into_iter()
        .map(|(name, value_from)| json!({ "Name": name, "ValueFrom": value_from }))
        .collect();

    let mut task_def = json!({
        "Family": format!("{stack_name}-relay"),
        "Cpu": task.cpu.to_string(),
        "Memory": task.memory_mib.to_string(),
        "NetworkMode": "awsvpc",
        "RequiresCompatibilities": ["FARGATE"],
        "ExecutionRoleArn": get_att(EXECUTION_ROLE_ID, "Arn"),
        "TaskRoleArn": get_att(TASK_ROLE_ID, "Arn"),
        "ContainerDefinitions": [{
            "Name": task.container_name,
            "Image": sub(image_uri),
            "Essential": true,
            "PortMappings": [{ "ContainerPort": port, "Protocol": "tcp" }],
            "Environment": environment,
            "Secrets": secrets,
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": ref_to(LOG_GROUP_ID),
                    "awslogs-stream-prefix": task.container_name,
                    "awslogs-region": ref_to("AWS::Region"),
                },
            },
        }],
    });
    if let Some(platform) = config.runtime_platform() {
        task_def["RuntimePlatform"] = serde_json::to_value(platform)?;
    }
    template.add(
        TASK_DEFINITION_ID,
        Resource::new("AWS::ECS::TaskDefinition", task_def),
    )?;

    template.add(
        SERVICE_SECURITY_GROUP_ID,
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{stack_name}/Service/SecurityGroup"),
                "VpcId": network.vpc_id,
                "SecurityGroupEgress": allow_all_outbound(),
            }),
        ),
    )?;
    template.add(
        SERVICE_INGRESS_ID,
        Resource::new(
            "AWS::EC2::SecurityGroupIngress",
            json!({
                "GroupId": get_att(SERVICE_SECURITY_GROUP_ID, "GroupId"),
                "SourceSecurityGroupId": lb.security_group_id,
                "IpProtocol": "tcp",
                "FromPort": port,
                "ToPort": port,
                "Description": "Allow from NLB Security Group",
            }),
        ),
    )?;

    let mut service = Resource::new(
        "AWS::ECS::Service",
        json!({
            "Cluster": cluster,
            "TaskDefinition": ref_to(TASK_DEFINITION_ID),
            "DesiredCount": task.count,
            "LaunchType": "FARGATE",
            "EnableECSManagedTags": false,
            "EnableExecuteCommand": task.enable_exec_command,
            "HealthCheckGracePeriodSeconds": 60,
            "DeploymentConfiguration": {
                "MaximumPercent": 200,
                "MinimumHealthyPercent": 50,
            },
            "LoadBalancers": [{
                "ContainerName": task.container_name,
                "ContainerPort": port,
                "TargetGroupArn": lb.target_group_arn,
            }],
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": "DISABLED",
                    "SecurityGroups": [get_att(SERVICE_SECURITY_GROUP_ID, "GroupId")],
                    "Subnets": network.private_subnets,
                },
            },
        }),
    )
    .depends_on(&lb.listener);
    if task.enable_exec_command {
        service = service.depends_on(TASK_POLICY_ID);
    }
    template.add(SERVICE_ID, service)?;

    tracing::debug!(
        cpu = task.cpu,
        memory_mib = task.memory_mib,
        desired = task.count,
        exec = task.enable_exec_command,
        "declared Fargate service"
    );
    Ok(ServiceRefs {
        service_id: SERVICE_ID.to_string(),
        cluster_id: CLUSTER_ID.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fargate_sizes() {
        assert!(is_valid_fargate_size(256, 512));
        assert!(is_valid_fargate_size(1024, 2048));
        assert!(is_valid_fargate_size(1024, 8192));
        assert!(is_valid_fargate_size(4096, 30720));
        assert!(is_valid_fargate_size(8192, 20480));
        assert!(!is_valid_fargate_size(256, 4096));
        assert!(!is_valid_fargate_size(1024, 1024));
        assert!(!is_valid_fargate_size(1024, 2500));
        assert!(!is_valid_fargate_size(8192, 17408));
        assert!(!is_valid_fargate_size(300, 1024));
    }

    #[test]
    fn secret_value_from_selects_json_key() {
        assert_eq!(
            secret_value_from("arn:aws:secretsmanager:us-east-1:1:secret:s-ABC", "user"),
            "arn:aws:secretsmanager:us-east-1:1:secret:s-ABC:user::"
        );
    }

    #[test]
    fn environment_is_space_joined() {
        let mut cfg = RelayConfig::default();
        let clients: Vec<Cidr> = vec![
            "10.21.0.0/16".parse().unwrap(),
            "192.168.0.0/16".parse().unwrap(),
        ];
        cfg.relay.helo.allowed_domains = vec!["a.tld".to_string(), "b.tld".to_string()];
        cfg.relay.helo.enabled = false;
        let env: std::collections::BTreeMap<String, String> =
            container_environment(&cfg, &clients).into_iter().collect();
        assert_eq!(env["ALLOWED_CLIENTS"], "10.21.0.0/16 192.168.0.0/16");
        assert_eq!(env["ALLOWED_HELO_DOMAINS"], "a.tld b.tld");
        assert_eq!(env["ENABLE_HELO_DOMAIN_RESTRICTIONS"], "False");
        assert_eq!(env["POSTFIX_SMTP_PORT"], "25");
        assert_eq!(env["SES_SMTP_ENDPOINT"], "email-smtp.us-east-1.amazonaws.com");
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn secrets_never_leak_into_environment() {
        let cfg = RelayConfig::default();
        let secrets = container_secrets(&cfg);
        let names: Vec<&str> = secrets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, [PASSWORD_SECRET_ENV, USERNAME_SECRET_ENV]);
        for (name, value) in container_environment(&cfg, &[]) {
            assert!(!name.starts_with("SES_SMTP_USER") && !name.starts_with("SES_SMTP_PASS"));
            assert!(!value.contains(&cfg.secret.arn));
        }
    }
}
