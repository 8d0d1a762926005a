//! estate-mailer entry point

use clap::Parser;
use core_config::tracing::install_color_eyre;
use estate_mailer::Cli;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    estate_mailer::run(Cli::parse()).await
}
