//! campus-events CLI entry point.

use clap::Parser;

use campus_events::cli::{commands, handle_error, load_config, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
            Commands::Health => commands::health::execute(config, cli.json).await,
            Commands::Config => commands::config::execute(config, cli.json),
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
