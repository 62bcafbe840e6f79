use crate::demo::{run_demo, DemoArgs};
use crate::server;
use charge_optimizer::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Charge Optimizer",
    about = "Share surplus solar production between plugged-in vehicles",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduling engine and the health check (default command)
    Serve(ServeArgs),
    /// Walk a sample fleet through one priority, allocation and decision pass
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the health check
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the health check
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}
