//! Operator is a long lived process that deploys OVN controllers and Open vSwitch on every node.
#![deny(missing_docs)]
use anyhow::Result;
use clap::{Parser, Subcommand};
use opentelemetry::{global, KeyValue};
use ovn_operator::ovn_controller;
use ovn_operator_common::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        long,
        env = "OPERATOR_OTLP_ENDPOINT",
        default_value = "http://localhost:4317"
    )]
    otlp_endpoint: String,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the operator
    Daemon,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Daemon => "daemon",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let meter_provider = telemetry::init(args.otlp_endpoint.clone()).await?;

    let meter = global::meter("ovn-operator");
    let runs = meter
        .u64_counter("operator_runs")
        .with_description("Number of runs of the operator")
        .init();
    runs.add(1, &[KeyValue::new("command", args.command.name())]);

    info!(?args.command, ?args.otlp_endpoint, "starting operator");
    match args.command {
        Command::Daemon => ovn_controller::run().await?,
    };

    // Flush traces and metrics before shutdown
    telemetry::shutdown(meter_provider)?;
    Ok(())
}
