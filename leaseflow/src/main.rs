use anyhow::Result;
use clap::Parser;

use leaseflow::{App, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let mut app = App::new(Cli::parse())?;
    app.run().await
}
