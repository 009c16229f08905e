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
    bookcheck::logging::init().context("init logging")?;

    let cli = bookcheck::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookcheck::cli::Command::Scan(args) => {
            bookcheck::scan::run(args).context("scan")?;
        }
        bookcheck::cli::Command::Validate {
            command: bookcheck::cli::ValidateCommand::Book(args),
        } => {
            bookcheck::validate::run_book(args)
                .await
                .context("validate book")?;
        }
        bookcheck::cli::Command::Validate {
            command: bookcheck::cli::ValidateCommand::Chapter(args),
        } => {
            bookcheck::validate::run_chapter(args)
                .await
                .context("validate chapter")?;
        }
        bookcheck::cli::Command::Report(args) => {
            bookcheck::validate::run_report(args).await.context("report")?;
        }
        bookcheck::cli::Command::Renumber(args) => {
            bookcheck::order::run(args).await.context("renumber")?;
        }
    }

    Ok(())
}
