//! Run a single scenario instance against a push server.
//!
//! ```text
//! scenario --websocket_url wss://push.example.com scenarios:basic
//! scenario -u wss://push.example.com reconnect_forever 0 1
//! ```

use std::sync::Arc;

use clap::Parser;

use pushload::{logging, run_plan, CommonArgs};
use pushload_engine::testplan::coerce_args;
use pushload_engine::{ScenarioRegistry, TestPlanEntry};

#[derive(Parser, Debug)]
#[command(name = "scenario", about = "Run one scenario instance against a push server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Scenario reference (module:function).
    scenario: String,

    /// Arguments for the specific scenario.
    #[arg(trailing_var_arg = true)]
    scenario_args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.common)?;

    let registry = Arc::new(ScenarioRegistry::with_builtins());
    let scenario = registry.lookup(&cli.scenario)?;
    let args = coerce_args(&cli.scenario_args);

    // A smoke run: one instance, once.
    let entry = TestPlanEntry {
        scenario,
        quantity: 1,
        stagger: 1,
        delay: 0,
        args,
    };
    run_plan(&cli.common, vec![entry], registry).await
}
