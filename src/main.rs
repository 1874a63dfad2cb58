use clap::Parser;

use ssopulse::cli::{self, args::Cli};
use ssopulse::status::ExitStatus;

#[tokio::main]
async fn main() -> ExitStatus {
    let cli = Cli::parse();
    cli::init_logging(&cli);
    cli::run(cli).await
}
