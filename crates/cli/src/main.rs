//! `cloud-provisioner` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a workflow plan JSON file.
//! - `run`: run a workflow plan against the in-memory control plane.
//! - `demo`: run one of the built-in blueprints.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use controlplane::memory::CallKind;
use controlplane::{ErrorKind, InMemoryControlPlane, ResourceKind};
use engine::blueprints::{AutoScaling, InstanceWithSecurityGroup, ScheduledFunction};
use engine::{RetryPolicy, RunnerConfig, Workflow, WorkflowPlan, WorkflowRunner};

#[derive(Parser)]
#[command(
    name = "cloud-provisioner",
    about = "Dependency-ordered provisioning of cloud resources",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow plan JSON file.
    Validate {
        /// Path to the plan file.
        path: PathBuf,
    },
    /// Run a workflow plan.
    Run {
        /// Path to the plan file.
        path: PathBuf,
        #[command(flatten)]
        simulation: SimulationArgs,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Run a built-in blueprint.
    Demo {
        #[arg(value_enum)]
        blueprint: Blueprint,
        /// Source range allowed into the security group of the EC2 blueprints.
        #[arg(long, default_value = "0.0.0.0/0")]
        ingress_cidr: String,
        #[command(flatten)]
        simulation: SimulationArgs,
        #[command(flatten)]
        retry: RetryArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Blueprint {
    ScheduledFunction,
    Instance,
    Autoscaling,
}

/// Overrides for the retry policy.
#[derive(Args, Debug, Clone)]
struct RetryArgs {
    #[arg(long, env = "PROVISIONER_INITIAL_DELAY_MS")]
    initial_delay_ms: Option<u64>,
    #[arg(long, env = "PROVISIONER_MULTIPLIER")]
    multiplier: Option<f64>,
    #[arg(long, env = "PROVISIONER_MAX_DELAY_MS")]
    max_delay_ms: Option<u64>,
    #[arg(long, env = "PROVISIONER_MAX_ELAPSED_MS")]
    max_elapsed_ms: Option<u64>,
}

impl RetryArgs {
    fn is_set(&self) -> bool {
        self.initial_delay_ms.is_some()
            || self.multiplier.is_some()
            || self.max_delay_ms.is_some()
            || self.max_elapsed_ms.is_some()
    }

    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(ms) = self.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(m) = self.multiplier {
            policy.multiplier = m;
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_elapsed_ms {
            policy.max_elapsed = Duration::from_millis(ms);
        }
        policy
    }
}

/// Shapes the in-memory control plane the workflow runs against.
#[derive(Args, Debug, Clone)]
struct SimulationArgs {
    /// Resource left over from an earlier run, as `kind:name`. Repeatable.
    #[arg(long = "existing", value_parser = parse_existing)]
    existing: Vec<Existing>,
    /// Make the first N creates of a kind fail transiently, as `kind:N`. Repeatable.
    #[arg(long = "transient", value_parser = parse_transient)]
    transient: Vec<Transient>,
    /// Tear everything down after the run, whatever its outcome.
    #[arg(long)]
    teardown: bool,
}

#[derive(Debug, Clone)]
struct Existing {
    kind: ResourceKind,
    name: String,
}

#[derive(Debug, Clone)]
struct Transient {
    kind: ResourceKind,
    times: u32,
}

fn parse_existing(s: &str) -> Result<Existing, String> {
    let (kind, name) = s
        .split_once(':')
        .ok_or_else(|| format!("expected kind:name, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("missing resource name in '{s}'"));
    }
    Ok(Existing {
        kind: kind.parse()?,
        name: name.to_owned(),
    })
}

fn parse_transient(s: &str) -> Result<Transient, String> {
    let (kind, times) = s
        .split_once(':')
        .ok_or_else(|| format!("expected kind:count, got '{s}'"))?;
    Ok(Transient {
        kind: kind.parse()?,
        times: times
            .parse()
            .map_err(|e| format!("invalid count '{times}': {e}"))?,
    })
}

impl SimulationArgs {
    fn build_plane(&self) -> Arc<InMemoryControlPlane> {
        let plane = InMemoryControlPlane::new();
        for existing in &self.existing {
            plane.seed(existing.kind, &existing.name);
        }
        for transient in &self.transient {
            plane.inject(CallKind::Create, transient.kind, ErrorKind::Transient, transient.times);
        }
        Arc::new(plane)
    }
}

fn load_plan(path: &Path) -> anyhow::Result<WorkflowPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    WorkflowPlan::from_json(&content).with_context(|| format!("invalid plan {}", path.display()))
}

async fn execute(
    workflow: Workflow,
    policy: RetryPolicy,
    plane: &InMemoryControlPlane,
    teardown: bool,
) -> anyhow::Result<()> {
    let runner = WorkflowRunner::new(RunnerConfig { retry: policy });

    let result = runner.run(&workflow).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if teardown {
        let report = runner.teardown(&workflow, &result).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!(remaining = plane.resources().len(), "resources left on the control plane");

    match &result.failure {
        Some(failure) => bail!(
            "workflow '{}' failed at step {} ('{}'): {}",
            result.workflow,
            failure.index,
            failure.name,
            failure.message
        ),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let plan = load_plan(&path)?;
            match plan.validate() {
                Ok(order) => {
                    println!("✅ Plan '{}' is valid. Execution order: {order:?}", plan.name);
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run {
            path,
            simulation,
            retry,
        } => {
            let mut plan = load_plan(&path)?;
            // Flags override the plan's own policy; per-step policies still win.
            if retry.is_set() {
                plan.retry = Some(retry.apply(plan.retry.clone().unwrap_or_default()));
            }
            let policy = plan.retry.clone().unwrap_or_default();

            info!("Running plan '{}' from {}", plan.name, path.display());
            let plane = simulation.build_plane();
            let workflow = plan.into_workflow(plane.clone())?;
            execute(workflow, policy, &plane, simulation.teardown).await?;
        }
        Command::Demo {
            blueprint,
            ingress_cidr,
            simulation,
            retry,
        } => {
            let plane = simulation.build_plane();
            let workflow = match blueprint {
                Blueprint::ScheduledFunction => ScheduledFunction::demo().workflow(plane.clone()),
                Blueprint::Instance => {
                    InstanceWithSecurityGroup::demo(ingress_cidr).workflow(plane.clone())
                }
                Blueprint::Autoscaling => AutoScaling::demo(ingress_cidr).workflow(plane.clone()),
            };

            info!("Running blueprint '{}'", workflow.name);
            let policy = retry.apply(RetryPolicy::default());
            execute(workflow, policy, &plane, simulation.teardown).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn existing_and_transient_flags_parse() {
        let cli = Cli::try_parse_from([
            "cloud-provisioner",
            "demo",
            "scheduled-function",
            "--existing",
            "role:demo-lambda-role",
            "--transient",
            "function:2",
            "--teardown",
            "--initial-delay-ms",
            "10",
        ])
        .unwrap();

        let Command::Demo {
            simulation, retry, ..
        } = cli.command
        else {
            panic!("expected demo");
        };
        assert_eq!(simulation.existing[0].kind, ResourceKind::Role);
        assert_eq!(simulation.existing[0].name, "demo-lambda-role");
        assert_eq!(simulation.transient[0].times, 2);
        assert!(simulation.teardown);
        assert_eq!(
            retry.apply(RetryPolicy::default()).initial_delay,
            Duration::from_millis(10)
        );
    }

    #[test]
    fn autoscaling_blueprint_is_selectable() {
        let cli = Cli::try_parse_from(["cloud-provisioner", "demo", "autoscaling"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Demo {
                blueprint: Blueprint::Autoscaling,
                ..
            }
        ));
    }

    #[test]
    fn malformed_simulation_flags_are_rejected() {
        assert!(parse_existing("role").is_err());
        assert!(parse_existing("role:").is_err());
        assert!(parse_existing("bucket:x").is_err());
        assert!(parse_transient("function:many").is_err());
    }
}
