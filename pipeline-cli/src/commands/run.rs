use crate::output;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use color_eyre::Result;
use serde_json::{Map, Value};

use pipeline_engine::{progress_channel, ChannelObserver, OrchestrationEvent, PlanStatus, ServiceBuilder};
use pipeline_rpc::{InterruptHandler, RpcServer};

/// Run a plan to completion, streaming node transitions
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the plan YAML or JSON file
    pub plan: PathBuf,

    /// Set a plan input (can be repeated, format: name=value)
    #[arg(long = "input", short = 'i', value_name = "NAME=VALUE")]
    pub inputs: Vec<String>,

    /// Principal recorded on the execution
    #[arg(long, default_value = "cli")]
    pub principal: String,

    /// Register an interrupt on the plan, or on a node when it starts (can be repeated)
    #[arg(long = "interrupt", value_name = "TYPE[@NODE]")]
    pub interrupts: Vec<String>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    pub json: bool,
}

/// An interrupt requested on the command line
#[derive(Debug, Clone, PartialEq)]
struct InterruptRequest {
    interrupt_type: String,
    node: Option<String>,
}

fn parse_interrupt(raw: &str) -> Result<InterruptRequest> {
    let (interrupt_type, node) = match raw.split_once('@') {
        Some((t, n)) if !n.is_empty() => (t, Some(n.to_string())),
        Some(_) => color_eyre::eyre::bail!("Invalid interrupt '{}'. Expected TYPE@NODE", raw),
        None => (raw, None),
    };
    InterruptHandler::parse_type(interrupt_type)?;
    Ok(InterruptRequest {
        interrupt_type: interrupt_type.to_string(),
        node,
    })
}

/// Values that parse as JSON keep their type, everything else is a string
fn parse_inputs(raw: &[String]) -> Result<Value> {
    let mut inputs = Map::new();
    for input in raw {
        let Some((name, value)) = input.split_once('=') else {
            color_eyre::eyre::bail!("Invalid input format '{}'. Expected name=value", input);
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        inputs.insert(name.to_string(), value);
    }
    Ok(Value::Object(inputs))
}

pub async fn execute(args: RunArgs, builder: ServiceBuilder) -> Result<()> {
    let plan_path = &args.plan;

    if !plan_path.exists() {
        color_eyre::eyre::bail!("Plan file not found: {}", plan_path.display());
    }

    let inputs = parse_inputs(&args.inputs)?;
    let mut pending = args
        .interrupts
        .iter()
        .map(|raw| parse_interrupt(raw))
        .collect::<Result<Vec<_>>>()?;

    let (tx, mut rx) = progress_channel();
    let server = RpcServer::start(builder.observe_sync(Arc::new(ChannelObserver::new(tx))))?;

    output::status("Parsing", &format!("{}", plan_path.display()));
    let plan = server.execution_handler().parse_from_file(plan_path)?;
    output::info(&format!("Plan '{}': {} nodes", plan.name, plan.nodes.len()));

    let started = Instant::now();
    let execution = server
        .execution_handler()
        .start_execution(plan, inputs, &args.principal)
        .await?;
    let plan_execution_id = execution.uuid.clone();

    println!();
    output::header(&format!("Execution {}", plan_execution_id));

    let (plan_level, node_level): (Vec<_>, Vec<_>) = pending.drain(..).partition(|r| r.node.is_none());
    pending = node_level;
    for request in plan_level {
        register(&server, &request, &plan_execution_id).await;
    }

    let mut final_status = execution.status;
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                output::warning("Interrupted, aborting plan");
                let abort = InterruptRequest { interrupt_type: "ABORT".to_string(), node: None };
                register(&server, &abort, &plan_execution_id).await;
                continue;
            }
        };
        let Some(event) = event else { break };
        if event.plan_execution_id() != plan_execution_id {
            continue;
        }

        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        }

        match &event {
            OrchestrationEvent::OrchestrationStart { .. } => {}
            OrchestrationEvent::NodeStart {
                node_execution_id,
                plan_node_id,
                ..
            } => {
                if !args.json {
                    output::dim(&format!("    {:<12} {}", "STARTED", plan_node_id));
                }
                let (due, rest): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|r| r.node.as_deref() == Some(plan_node_id.as_str()));
                pending = rest;
                for request in due {
                    register(&server, &request, node_execution_id).await;
                }
            }
            OrchestrationEvent::NodeStatusUpdate {
                plan_node_id, from, to, ..
            } => {
                if !args.json {
                    output::node_status(plan_node_id, *from, *to);
                }
            }
            OrchestrationEvent::InterventionWaitStart { plan_node_id, .. } => {
                output::warning(&format!("'{}' is waiting for intervention", plan_node_id));
            }
            OrchestrationEvent::OrchestrationEnd { status, .. } => {
                final_status = *status;
                break;
            }
        }
    }

    println!();
    output::plan_outcome(final_status, started.elapsed().as_secs_f64());
    for request in &pending {
        output::warning(&format!(
            "{} was never registered: node '{}' did not start",
            request.interrupt_type,
            request.node.as_deref().unwrap_or_default()
        ));
    }
    for interrupt in server.interrupt_handler().list(&plan_execution_id).await? {
        output::dim(&format!(
            "  interrupt {} on {}: {:?}",
            interrupt.interrupt_type.as_str(),
            interrupt
                .node_execution_id
                .as_deref()
                .unwrap_or(&interrupt.plan_execution_id),
            interrupt.state
        ));
    }

    server.shutdown().await;
    if final_status != PlanStatus::Succeeded {
        std::process::exit(1);
    }

    Ok(())
}

async fn register(server: &RpcServer, request: &InterruptRequest, target_id: &str) {
    let result = server
        .interrupt_handler()
        .register(&request.interrupt_type, target_id, BTreeMap::new(), "cli")
        .await;
    match result {
        Ok(interrupt) => output::info(&format!(
            "Registered {} on {}",
            interrupt.interrupt_type.as_str(),
            target_id
        )),
        Err(e) => output::error(&format!("{}: {}", request.interrupt_type, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interrupt() {
        assert_eq!(
            parse_interrupt("abort").unwrap(),
            InterruptRequest {
                interrupt_type: "abort".to_string(),
                node: None
            }
        );
        assert_eq!(
            parse_interrupt("MARK_SUCCESS@approve").unwrap().node.as_deref(),
            Some("approve")
        );
        assert!(parse_interrupt("retry@").is_err());
        assert!(parse_interrupt("explode").is_err());
    }

    #[test]
    fn test_parse_inputs() {
        let inputs = parse_inputs(&["count=3".to_string(), "env=prod".to_string()]).unwrap();
        assert_eq!(inputs["count"], Value::from(3));
        assert_eq!(inputs["env"], Value::from("prod"));
        assert!(parse_inputs(&["broken".to_string()]).is_err());
    }
}
