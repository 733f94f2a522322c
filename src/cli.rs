use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "ytscribe",
    about = "YouTube transcript generator",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Config file (default: ~/.config/ytscribe/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// User id that owns generated transcripts
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Show cache/save details and where output went
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch (or reuse) the transcript for a YouTube URL and save it
    Generate {
        /// YouTube video URL (reads URLs from stdin if omitted)
        url: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Caption language code to use exactly (default: English, else the first track)
        #[arg(short, long)]
        lang: Option<String>,

        /// Write output to file instead of stdout; a directory gets a name from the title
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the caption tracks available for a YouTube URL
    Tracks { url: String },

    /// List your saved transcripts, newest first
    History,

    /// List community transcripts (no owner), newest first
    Community,

    /// Print a stored transcript
    Show {
        id: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Append the stored summary
        #[arg(long)]
        with_summary: bool,
    },

    /// Delete one of your transcripts
    Delete { id: String },

    /// Summarize a stored transcript and save the summary
    Summarize {
        id: String,

        /// Custom instructions replacing the default summary prompt
        #[arg(short, long)]
        prompt: Option<String>,

        /// LLM model for summarization (gemini*, claude*, or an OpenAI model)
        #[arg(long)]
        model: Option<String>,
    },

    /// Replace the summary of one of your transcripts by hand
    SetSummary {
        id: String,

        /// Summary text, or `-` to read it from stdin
        text: String,
    },

    /// Show today's usage against the daily limit
    Usage,
}
