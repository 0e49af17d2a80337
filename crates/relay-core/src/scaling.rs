//! Application Auto Scaling for the relay service: task-count bounds and a
//! CPU target tracking policy.

use crate::config::AutoscalingConfig;
use crate::error::Result;
use crate::service::ServiceRefs;
use crate::template::{get_att, join, ref_to, sub, Resource, Template};
use serde_json::json;

pub const SCALABLE_TARGET_ID: &str = "ScalableTarget";
pub const CPU_POLICY_ID: &str = "CpuScaling";

const ECS_AUTOSCALING_ROLE: &str = "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService";

pub fn declare_autoscaling(
    template: &mut Template,
    stack_name: &str,
    scaling: &AutoscalingConfig,
    service: &ServiceRefs,
) -> Result<()> {
    let resource_id = join(
        "",
        vec![
            json!("service/"),
            ref_to(&service.cluster_id),
            json!("/"),
            get_att(&service.service_id, "Name"),
        ],
    );
    template.add(
        SCALABLE_TARGET_ID,
        Resource::new(
            "AWS::ApplicationAutoScaling::ScalableTarget",
            json!({
                "MinCapacity": scaling.min_tasks,
                "MaxCapacity": scaling.max_tasks,
                "ResourceId": resource_id,
                "RoleARN": sub(ECS_AUTOSCALING_ROLE),
                "ScalableDimension": "ecs:service:DesiredCount",
                "ServiceNamespace": "ecs",
            }),
        ),
    )?;

    template.add(
        CPU_POLICY_ID,
        Resource::new(
            "AWS::ApplicationAutoScaling::ScalingPolicy",
            json!({
                "PolicyName": format!("{stack_name}{CPU_POLICY_ID}"),
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": ref_to(SCALABLE_TARGET_ID),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": {
                        "PredefinedMetricType": "ECSServiceAverageCPUUtilization",
                    },
                    "ScaleInCooldown": scaling.scale_in_cooldown_secs,
                    "ScaleOutCooldown": scaling.scale_out_cooldown_secs,
                    "TargetValue": scaling.target_cpu_percent,
                },
            }),
        ),
    )?;

    tracing::debug!(
        min = scaling.min_tasks,
        max = scaling.max_tasks,
        target_cpu = scaling.target_cpu_percent,
        "declared CPU autoscaling"
    );
    Ok(())
}
