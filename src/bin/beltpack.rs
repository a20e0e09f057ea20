//! Belt pack
//!
//! Usage: `beltpack [config.toml]`

use anyhow::Result;
use wireless_partyline::{app, config::Role};

#[tokio::main]
async fn main() -> Result<()> {
    app::run(Role::BeltPack).await
}
