//! Autoscaling group launched from a template: security group → launch
//! template → autoscaling group. Each of the three is adopted if it is
//! already there.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use controlplane::ops::{CreateResource, DeleteResource, LookupResource};
use controlplane::{ControlPlane, ResourceKind};

use crate::{Workflow, WorkflowStep};

pub const SECURITY_GROUP: &str = "security_group";
pub const LAUNCH_TEMPLATE: &str = "launch_template";
pub const AUTO_SCALING_GROUP: &str = "auto_scaling_group";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScaling {
    pub group_name: String,
    pub group_description: String,
    /// Source range allowed in on ports 22 and 80.
    pub ingress_cidr: String,
    pub template_name: String,
    /// Key pair the launched instances accept; it must already exist.
    pub key_name: String,
    pub image_id: String,
    pub instance_type: String,
    pub user_data: String,
    pub scaling_group_name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

impl AutoScaling {
    pub fn demo(ingress_cidr: impl Into<String>) -> Self {
        Self {
            group_name: "demo_sg".into(),
            group_description: "Testing default".into(),
            ingress_cidr: ingress_cidr.into(),
            template_name: "demo_launch_template".into(),
            key_name: "default_key".into(),
            image_id: "ami-08e0ca9924195beba".into(),
            instance_type: "t2.micro".into(),
            user_data: "#!/bin/bash\nyum install -y httpd\nsystemctl start httpd\n".into(),
            scaling_group_name: "awspy_autoscaling_group".into(),
            min_size: 1,
            max_size: 2,
            desired_capacity: 1,
        }
    }

    pub fn workflow(&self, plane: Arc<dyn ControlPlane>) -> Workflow {
        let ingress = |port: u16| {
            json!({
                "protocol": "tcp",
                "from_port": port,
                "to_port": port,
                "cidr": self.ingress_cidr,
            })
        };
        let security_group = WorkflowStep::create_or_adopt(
            SECURITY_GROUP,
            CreateResource::new(
                plane.clone(),
                ResourceKind::SecurityGroup,
                &self.group_name,
                json!({
                    "description": self.group_description,
                    "ingress": [ingress(22), ingress(80)],
                }),
            ),
            LookupResource::new(plane.clone(), ResourceKind::SecurityGroup, &self.group_name),
        )
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::SecurityGroup));

        let launch_template = WorkflowStep::create_or_adopt(
            LAUNCH_TEMPLATE,
            CreateResource::new(
                plane.clone(),
                ResourceKind::LaunchTemplate,
                &self.template_name,
                json!({
                    "image_id": self.image_id,
                    "instance_type": self.instance_type,
                    "key_name": self.key_name,
                    "user_data": self.user_data,
                }),
            )
            .bind("security_group_id", SECURITY_GROUP),
            LookupResource::new(plane.clone(), ResourceKind::LaunchTemplate, &self.template_name),
        )
        .depends_on([SECURITY_GROUP])
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::LaunchTemplate));

        let scaling_group = WorkflowStep::create_or_adopt(
            AUTO_SCALING_GROUP,
            CreateResource::new(
                plane.clone(),
                ResourceKind::AutoScalingGroup,
                &self.scaling_group_name,
                json!({
                    "min_size": self.min_size,
                    "max_size": self.max_size,
                    "desired_capacity": self.desired_capacity,
                }),
            )
            .bind("launch_template_id", LAUNCH_TEMPLATE)
            .slow(),
            LookupResource::new(
                plane.clone(),
                ResourceKind::AutoScalingGroup,
                &self.scaling_group_name,
            ),
        )
        .depends_on([LAUNCH_TEMPLATE])
        .with_teardown(DeleteResource::new(plane, ResourceKind::AutoScalingGroup));

        Workflow::new(format!("autoscaling:{}", self.scaling_group_name))
            .step(security_group)
            .step(launch_template)
            .step(scaling_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_chain;
    use controlplane::InMemoryControlPlane;

    #[test]
    fn workflow_chains_group_template_then_scaling_group() {
        let wf = AutoScaling::demo("0.0.0.0/0").workflow(Arc::new(InMemoryControlPlane::new()));
        assert_eq!(
            validate_chain(&wf).unwrap(),
            vec![SECURITY_GROUP, LAUNCH_TEMPLATE, AUTO_SCALING_GROUP]
        );
        assert!(wf.steps.iter().all(|s| s.is_creation() && s.teardown.is_some()));
    }

    #[test]
    fn demo_sizes_are_consistent() {
        let a = AutoScaling::demo("0.0.0.0/0");
        assert!(a.min_size <= a.desired_capacity && a.desired_capacity <= a.max_size);
    }
}
