//! Gateway: HTTP front door for the relay.
//!
//! Single port serves the relay API (`/task`, `/command`), health probes and the
//! Telegram webhook. Channel connectors run in-process and feed the same relay.

mod protocol;
mod server;

pub use protocol::{
    outcome_to_http, AttemptReport, CommandRequest, ErrorResponse, TaskRequest, TaskResponse,
};
pub use server::{build_relay, router, run_gateway, GatewayState};
