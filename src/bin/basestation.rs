//! Base station
//!
//! Bridges the wired party line to the belt pack. Usage:
//! `basestation [config.toml]`

use anyhow::Result;
use wireless_partyline::{app, config::Role};

#[tokio::main]
async fn main() -> Result<()> {
    app::run(Role::BaseStation).await
}
