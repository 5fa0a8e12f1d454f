use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Start { with_worker } => {
            commands::start::execute(&args.config, with_worker).await?;
        }
        cli::Commands::Worker => {
            commands::worker::execute(&args.config).await?;
        }
        cli::Commands::DeadLetters { service, limit, payload } => {
            commands::dead_letters::execute(&args.config, &service, limit, payload).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Version => {
            println!("logr v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
