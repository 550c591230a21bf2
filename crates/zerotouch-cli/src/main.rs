//! zerotouch - zero-touch bootstrapping demo and tooling

use anyhow::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    zerotouch_cli::run().await
}
