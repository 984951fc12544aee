use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::ServiceBuilder;
use pipeline_rpc::RpcServer;

/// Validate a plan file against the built-in registrations
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the plan YAML or JSON file
    pub plan: PathBuf,
}

pub async fn execute(args: ValidateArgs, builder: ServiceBuilder) -> Result<()> {
    let plan_path = &args.plan;

    if !plan_path.exists() {
        color_eyre::eyre::bail!("Plan file not found: {}", plan_path.display());
    }

    output::status("Validating", &format!("{}", plan_path.display()));

    let server = RpcServer::start(builder)?;
    let handler = server.execution_handler();

    let plan = match handler.parse_from_file(plan_path) {
        Ok(plan) => plan,
        Err(e) => {
            output::error(&e.to_string());
            server.shutdown().await;
            std::process::exit(1);
        }
    };
    output::check("Plan syntax valid");

    let advisers: usize = plan.nodes.iter().map(|n| n.advisers.len()).sum();
    output::check(&format!(
        "Structure: {} nodes, {} advisers, start at '{}'",
        plan.nodes.len(),
        advisers,
        plan.start_node_id
    ));

    let result = handler.validate(&plan);
    server.shutdown().await;
    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
    output::check("Registrations and graph valid");

    println!();
    output::success(&format!("Plan '{}' is valid", plan.name));

    Ok(())
}
