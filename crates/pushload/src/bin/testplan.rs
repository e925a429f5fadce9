//! Run a composite test plan against a push server.
//!
//! ```text
//! testplan --websocket_url wss://push.example.com \
//!     "scenarios:basic, 1000, 100, 0 | scenarios:notification_forever, 100, 10, 30"
//! ```

use std::sync::Arc;

use clap::Parser;

use pushload::{logging, run_plan, CommonArgs};
use pushload_engine::{parse_test_plan, ScenarioRegistry};

#[derive(Parser, Debug)]
#[command(name = "testplan", about = "Run a composite load-test plan against a push server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Plan: "<mod:func>, <quantity>, <stagger>, <delay>[, <arg>...][ | ...]"
    test_plan: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.common)?;

    let registry = Arc::new(ScenarioRegistry::with_builtins());
    let entries = parse_test_plan(&registry, &cli.test_plan)?;
    run_plan(&cli.common, entries, registry).await
}
