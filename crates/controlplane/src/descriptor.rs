//! Resource descriptors and resource kinds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

/// The resource types the control plane manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Role,
    Function,
    ScheduleRule,
    Permission,
    RuleTarget,
    KeyPair,
    SecurityGroup,
    Instance,
    LaunchTemplate,
    AutoScalingGroup,
    User,
    Group,
    Table,
    Alarm,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 14] = [
        Self::Role,
        Self::Function,
        Self::ScheduleRule,
        Self::Permission,
        Self::RuleTarget,
        Self::KeyPair,
        Self::SecurityGroup,
        Self::Instance,
        Self::LaunchTemplate,
        Self::AutoScalingGroup,
        Self::User,
        Self::Group,
        Self::Table,
        Self::Alarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role             => "role",
            Self::Function         => "function",
            Self::ScheduleRule     => "schedule_rule",
            Self::Permission       => "permission",
            Self::RuleTarget       => "rule_target",
            Self::KeyPair          => "key_pair",
            Self::SecurityGroup    => "security_group",
            Self::Instance         => "instance",
            Self::LaunchTemplate   => "launch_template",
            Self::AutoScalingGroup => "auto_scaling_group",
            Self::User             => "user",
            Self::Group            => "group",
            Self::Table            => "table",
            Self::Alarm            => "alarm",
        }
    }

    /// Attachments (permissions on a function, targets on a rule) are put
    /// rather than created: writing one again replaces it.
    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::Permission | Self::RuleTarget)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ResourceDescriptor
// ---------------------------------------------------------------------------

/// Opaque handle to a real-world resource: its identifier plus whatever
/// metadata the control plane returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Control-plane identifier (ARN, group id, instance id, ...).
    pub id: String,
    /// The name the resource was requested under.
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_kind_parses_its_own_display() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.to_string().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
        assert_eq!("auto_scaling_group".parse(), Ok(ResourceKind::AutoScalingGroup));
    }

    #[test]
    fn only_permissions_and_targets_are_attachments() {
        let attachments: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(ResourceKind::is_attachment)
            .collect();
        assert_eq!(attachments, vec![ResourceKind::Permission, ResourceKind::RuleTarget]);
    }

    #[test]
    fn descriptor_serializes_without_empty_metadata() {
        let d = ResourceDescriptor::new(ResourceKind::Role, "demo-role", "arn:role/demo-role");
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({ "id": "arn:role/demo-role", "name": "demo-role", "kind": "role" })
        );

        let d = d.with_metadata("policies", 2);
        assert_eq!(serde_json::to_value(&d).unwrap()["metadata"]["policies"], 2);
    }
}
