//! Scenario execution engine for the pushload WebPush load generator.
//!
//! A *scenario* is a suspendable procedure: an async function that yields
//! typed [`Command`]s through its [`ScenarioClient`] and is resumed with each
//! command's result (or has an error injected at the suspension point). One
//! [driver](driver) runs one scenario instance; a [`Harness`](harness::Harness)
//! owns the shared transport configuration and the FIFO pairing of drivers to
//! freshly opened WebSockets; the [`LoadRunner`] schedules staggered driver
//! launches from a test plan.
//!
//! ```text
//! LoadRunner ── schedules ──▶ Harness ── instantiates ──▶ ScenarioDriver
//!      ▲                        │  ▲                           │
//!      └── spawn(test_plan) ────┘  └── transport events ───────┘
//! ```

mod client;
mod command;
mod driver;
mod error;
pub mod harness;
pub mod registry;
pub mod runner;
pub mod scenarios;
pub mod testplan;
pub mod util;

pub use client::{DeliveryResult, ScenarioClient};
pub use command::{Command, CommandResult};
pub use error::ScenarioError;
pub use registry::{ScenarioRegistry, ScenarioSpec};
pub use runner::{LoadRunner, RunnerConfig};
pub use testplan::{parse_test_plan, ScenarioArg, ScenarioArgs, TestPlanEntry};

pub use pushload_transport::wire::{
    HelloResponse, Notification, RegisterResponse, UnregisterResponse,
};
pub use pushload_transport::NotificationResponse;
