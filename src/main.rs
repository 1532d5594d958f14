use clap::Parser;
use pi_monitor::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    pi_monitor::init_tracing();

    let cli = Cli::parse();
    match &cli.command {
        Some(Commands::Worker { kind, args }) => pi_monitor::run_worker(&cli.settings(), kind, args),
        _ => pi_monitor::run_node(&cli),
    }
}
