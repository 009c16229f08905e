use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Scan(ScanArgs),
    Validate {
        #[command(subcommand)]
        command: ValidateCommand,
    },
    Report(ReportArgs),
    Renumber(RenumberArgs),
}

#[derive(Debug, Subcommand)]
pub enum ValidateCommand {
    Book(ValidateBookArgs),
    Chapter(ValidateChapterArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// HTML fragment file to scan.
    #[arg(long)]
    pub html: String,

    /// Base URL for resolving relative media references (default: leave as-is).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Book id used when rewriting media URLs.
    #[arg(long, default_value_t = 0)]
    pub book: i64,

    /// Chapter id used when rewriting media URLs.
    #[arg(long, default_value_t = 0)]
    pub chapter: i64,
}

#[derive(Debug, Args)]
pub struct ValidateBookArgs {
    /// Content store directory.
    #[arg(long)]
    pub store: String,

    /// Book id to validate.
    #[arg(long)]
    pub book: i64,

    /// Base URL for resolving relative media references.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateChapterArgs {
    /// Content store directory.
    #[arg(long)]
    pub store: String,

    /// Book id the chapter belongs to.
    #[arg(long)]
    pub book: i64,

    /// Chapter id to validate.
    #[arg(long)]
    pub chapter: i64,

    /// Base URL for resolving relative media references.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Content store directory.
    #[arg(long)]
    pub store: String,

    /// Book id the chapter belongs to.
    #[arg(long)]
    pub book: i64,

    /// Chapter id to report faults for.
    #[arg(long)]
    pub chapter: i64,

    /// Base URL for resolving relative media references.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct RenumberArgs {
    /// Content store directory.
    #[arg(long)]
    pub store: String,

    /// Book id to renumber.
    #[arg(long)]
    pub book: i64,
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
