use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

#[derive(Debug, Parser)]
#[command(name = "liftlog")]
#[command(bin_name = "liftlog")]
#[command(version)]
#[command(about = "Debounced, duplicate-free workout log saves")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        env = "LIFTLOG_DB_PATH",
        default_value = ".liftlog/logs.sqlite",
        help = "Path to the SQLite workout log database."
    )]
    pub db: PathBuf,

    #[arg(
        short = 'c',
        long,
        env = "LIFTLOG_CONFIG",
        help = "Optional TOML file with sync settings."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'a',
        long,
        env = "LIFTLOG_ACCOUNT",
        default_value = "local",
        help = "Account that owns the logs; other accounts are refused."
    )]
    pub account: String,

    #[arg(long, help = "Override the quiet window before a save starts.")]
    pub debounce_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create or migrate the workout log database.")]
    Init,
    #[command(about = "Save one exercise batch for a workout day.")]
    Save(SaveArgs),
    #[command(about = "Show the stored log for a workout day.")]
    Show(ShowArgs),
    #[command(about = "Replay a JSON-lines stream of edits through the debouncer.")]
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SlotArgs {
    #[arg(long, help = "Program id.")]
    pub program: String,
    #[arg(long, help = "Zero-based week index.")]
    pub week: u32,
    #[arg(long, help = "Zero-based day index within the week.")]
    pub day: u32,
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    #[command(flatten)]
    pub slot: SlotArgs,
    #[arg(
        long,
        value_name = "FILE",
        help = "JSON array of exercise entries, or '-' for stdin."
    )]
    pub exercises: String,
    #[arg(long, help = "Mark the workout finished.")]
    pub finished: bool,
    #[arg(long, help = "Print JSON output.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub slot: SlotArgs,
    #[arg(long, help = "Print JSON output.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[arg(long, value_name = "EDITS.jsonl", help = "Edit events, one JSON object per line.")]
    pub file: PathBuf,
    #[arg(long, help = "Print events as JSON lines.")]
    pub json: bool,
}
