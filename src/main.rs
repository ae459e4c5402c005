use clap::Parser;
use chatrelay_lib::app::bootstrap::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatrelay_lib::run(CliArgs::parse()).await
}
