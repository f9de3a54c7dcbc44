use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = draft_ingest_cli::Cli::parse();
    draft_ingest_cli::init_tracing(cli.log_format())?;
    draft_ingest_cli::run_cli(cli)
}
