//! Scheduled function: role → function → schedule rule → invoke permission
//! → rule target. Teardown removes them in the opposite order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use controlplane::ops::{CreateResource, DeleteResource, LookupResource};
use controlplane::{ControlPlane, ResourceKind};

use crate::{Workflow, WorkflowStep};

pub const ROLE: &str = "role";
pub const FUNCTION: &str = "function";
pub const RULE: &str = "rule";
pub const PERMISSION: &str = "permission";
pub const TARGET: &str = "target";

const BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
const EC2_FULL_ACCESS_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEC2FullAccess";

/// Parameters of a function invoked on a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFunction {
    pub role_name: String,
    /// Managed policies attached to the role.
    pub policies: Vec<String>,
    pub function_name: String,
    pub description: String,
    /// `<module>.<function>` inside the deployment package.
    pub handler: String,
    pub runtime: String,
    /// Where the packaged code lives; packaging itself happens elsewhere.
    pub code_location: String,
    pub rule_name: String,
    /// `cron(...)` or `rate(...)`.
    pub schedule: String,
}

impl ScheduledFunction {
    /// The demo deployment: a function that stops instances on a daily cron.
    pub fn demo() -> Self {
        Self {
            role_name: "demo-lambda-role".into(),
            policies: vec![BASIC_EXECUTION_POLICY.into(), EC2_FULL_ACCESS_POLICY.into()],
            function_name: "demo-lambda-scheduled".into(),
            description: "Demo Lambda to Stop EC2 instance".into(),
            handler: "lambda_handler_scheduled.lambda_handler".into(),
            runtime: "python3.9".into(),
            code_location: "lambda_handler_scheduled.zip".into(),
            rule_name: "demo-event-scheduled".into(),
            schedule: "cron(38 11 * * ? *)".into(),
        }
    }

    pub fn permission_name(&self) -> String {
        format!("{}-invoke", self.function_name)
    }

    pub fn target_name(&self) -> String {
        format!("{}:{}", self.rule_name, self.function_name)
    }

    pub fn workflow(&self, plane: Arc<dyn ControlPlane>) -> Workflow {
        let role = WorkflowStep::create_or_adopt(
            ROLE,
            CreateResource::new(
                plane.clone(),
                ResourceKind::Role,
                &self.role_name,
                json!({
                    "assume_role_principal": "lambda.amazonaws.com",
                    "policies": self.policies,
                }),
            ),
            LookupResource::new(plane.clone(), ResourceKind::Role, &self.role_name),
        )
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::Role));

        // The function service rejects a role it cannot assume yet; the
        // back-off executor rides that out.
        let function = WorkflowStep::create_or_adopt(
            FUNCTION,
            CreateResource::new(
                plane.clone(),
                ResourceKind::Function,
                &self.function_name,
                json!({
                    "description": self.description,
                    "runtime": self.runtime,
                    "handler": self.handler,
                    "code": self.code_location,
                    "publish": true,
                }),
            )
            .bind("role_arn", ROLE)
            .slow(),
            LookupResource::new(plane.clone(), ResourceKind::Function, &self.function_name),
        )
        .depends_on([ROLE])
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::Function));

        let rule = WorkflowStep::create_or_adopt(
            RULE,
            CreateResource::new(
                plane.clone(),
                ResourceKind::ScheduleRule,
                &self.rule_name,
                json!({ "schedule_expression": self.schedule }),
            ),
            LookupResource::new(plane.clone(), ResourceKind::ScheduleRule, &self.rule_name),
        )
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::ScheduleRule));

        // Permission and target are attachments: writing them again replaces
        // them, so there is nothing to adopt.
        let permission = WorkflowStep::invoke(
            PERMISSION,
            CreateResource::new(
                plane.clone(),
                ResourceKind::Permission,
                self.permission_name(),
                json!({
                    "action": "lambda:InvokeFunction",
                    "principal": "events.amazonaws.com",
                }),
            )
            .bind("function_arn", FUNCTION)
            .bind("source_arn", RULE),
        )
        .depends_on([FUNCTION, RULE])
        .with_teardown(DeleteResource::new(plane.clone(), ResourceKind::Permission));

        let target = WorkflowStep::invoke(
            TARGET,
            CreateResource::new(
                plane.clone(),
                ResourceKind::RuleTarget,
                self.target_name(),
                json!({ "target_id": self.function_name }),
            )
            .bind("rule_arn", RULE)
            .bind("target_arn", FUNCTION),
        )
        .depends_on([RULE, FUNCTION])
        .with_teardown(DeleteResource::new(plane, ResourceKind::RuleTarget));

        Workflow::new(format!("scheduled-function:{}", self.function_name))
            .step(role)
            .step(function)
            .step(rule)
            .step(permission)
            .step(target)
    }
}
