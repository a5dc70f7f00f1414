//! Ready-made provisioning workflows for the chains this tool sets up.

pub mod autoscaling;
pub mod instance;
pub mod scheduled_function;

pub use autoscaling::AutoScaling;
pub use instance::InstanceWithSecurityGroup;
pub use scheduled_function::ScheduledFunction;
