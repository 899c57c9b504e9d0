use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "meg2bids",
    version,
    about = "Convert raw MEG/MRI acquisitions into a BIDS-style dataset",
    long_about = "Convert raw MEG recordings (and optional structural MRI) into a \
                  standardized dataset layout, decoding trigger events from the \
                  binary STI channels.\n\
                  Project settings, the event dictionary and the subject dictionary \
                  are JSON files; see the repository README."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full conversion for every subject
    Convert(ConvertArgs),
    /// Validate the settings, subject dictionary and event dictionary
    Validate(ValidateArgs),
    /// Decode trigger events from one staged recording
    Decode(DecodeArgs),
    /// Show version, configuration and external tool availability
    Info(InfoArgs),
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Path to the settings file
    #[arg(long, env = "MEG2BIDS_CONFIG", default_value = "config.json")]
    pub config: String,

    /// Keep the existing output folders instead of purging them first.
    /// Purging is recommended to avoid conflicts, but be careful not to
    /// delete important data.
    #[arg(long, default_value_t = false)]
    pub keep_existing_folders: bool,

    /// Keep the temporary sourcedata folder after the conversion
    #[arg(long, default_value_t = false)]
    pub keep_source_data: bool,

    /// Write the run report as JSON to this file (default: stdout summary)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the settings file
    #[arg(long, env = "MEG2BIDS_CONFIG", default_value = "config.json")]
    pub config: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Path to the settings file
    #[arg(long, env = "MEG2BIDS_CONFIG", default_value = "config.json")]
    pub config: String,

    /// Staged recording manifest to decode
    #[arg(long)]
    pub file: String,

    /// Apply the audio/visual latency correction to the decoded onsets
    #[arg(long, default_value_t = false)]
    pub adjust: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Path to the settings file; tool availability is skipped without it
    #[arg(long, env = "MEG2BIDS_CONFIG")]
    pub config: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
