//! Instance with its key pair and security group.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use controlplane::ops::{CreateResource, DeleteResource, LookupResource};
use controlplane::{ControlPlane, ResourceKind};

use crate::{Workflow, WorkflowStep};

pub const KEY_PAIR: &str = "key_pair";
pub const SECURITY_GROUP: &str = "security_group";
pub const INSTANCE: &str = "instance";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceWithSecurityGroup {
    pub key_name: String,
    pub group_name: String,
    pub group_description: String,
    /// Source range allowed in on ports 22 and 80.
    pub ingress_cidr: String,
    pub image_id: String,
    pub instance_type: String,
    /// Boot script; encoding it for the wire is the control plane's business.
    pub user_data: String,
}

impl InstanceWithSecurityGroup {
    pub fn demo(ingress_cidr: impl Into<String>) -> Self {
        Self {
            key_name: "default_key".into(),
            group_name: "demo_sg".into(),
            group_description: "Testing default".into(),
            ingress_cidr: ingress_cidr.into(),
            image_id: "ami-0567e0d2b4b2169ae".into(),
            instance_type: "t2.micro".into(),
            user_data: "sudo apt-get update -y\nsudo apt-get install docker-ce docker-ce-cli containerd.io -y\n"
                .into(),
        }
    }

    pub fn workflow(&self, plane: Arc<dyn ControlPlane>) -> Workflow {
        let key_pair = WorkflowStep::create_or_adopt(
            KEY_PAIR,
            CreateResource::new(plane.clone(), ResourceKind::KeyPair, &self.key_name, json!({})),
            LookupResource::new(plane.clone(), ResourceKind::KeyPair, &self.key_name),
        )
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::KeyPair));

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

        // Instances have no unique name on the control plane, so a conflict
        // cannot be adopted.
        let instance = WorkflowStep::create(
            INSTANCE,
            CreateResource::new(
                plane.clone(),
                ResourceKind::Instance,
                format!("{}-{}", self.group_name, self.key_name),
                json!({
                    "image_id": self.image_id,
                    "instance_type": self.instance_type,
                    "user_data": self.user_data,
                    "min_count": 1,
                    "max_count": 1,
                }),
            )
            .bind("key_pair_id", KEY_PAIR)
            .bind("security_group_id", SECURITY_GROUP)
            .slow(),
        )
        .depends_on([KEY_PAIR, SECURITY_GROUP])
        .with_teardown(DeleteResource::new(plane, ResourceKind::Instance));

        Workflow::new(format!("instance:{}", self.group_name))
            .step(key_pair)
            .step(security_group)
            .step(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RunnerConfig, WorkflowRunner, WorkflowStatus};
    use controlplane::InMemoryControlPlane;

    #[tokio::test(start_paused = true)]
    async fn existing_security_group_is_adopted() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let existing = plane.seed(ResourceKind::SecurityGroup, "demo_sg");

        let wf = InstanceWithSecurityGroup::demo("203.0.113.7/32").workflow(plane.clone());
        let result = WorkflowRunner::new(RunnerConfig::default()).run(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.descriptor(SECURITY_GROUP), Some(&existing));
        let instance = result.descriptor(INSTANCE).unwrap();
        assert_eq!(instance.metadata["security_group_id"], existing.id.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn second_instance_with_same_name_fails_without_adoption() {
        let plane = Arc::new(InMemoryControlPlane::new());
        plane.seed(ResourceKind::Instance, "demo_sg-default_key");

        let wf = InstanceWithSecurityGroup::demo("0.0.0.0/0").workflow(plane.clone());
        let result = WorkflowRunner::default().run(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.failed_step(), Some(2));
        assert_eq!(result.completed.len(), 2);
    }
}
