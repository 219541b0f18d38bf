use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = tocwatch::cli::Cli::parse();

    match cli.command {
        tocwatch::cli::Command::Normalize(args) => {
            tocwatch::logging::init("warn").context("init logging")?;
            tracing::debug!(?args, "parsed cli");
            tocwatch::normalize::run(args).context("normalize")?;
        }
        tocwatch::cli::Command::Watch(args) => {
            tocwatch::logging::init("info").context("init logging")?;
            tracing::debug!(?args, "parsed cli");
            tocwatch::watch::run(args).await.context("watch")?;
        }
    }

    Ok(())
}
