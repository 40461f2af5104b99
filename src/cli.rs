use clap::{ArgGroup, Parser};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sitewatch")]
#[command(about = "Check whether sites are up and react when they go down or come back")]
#[command(version)]
#[command(group(ArgGroup::new("targets").args(["url", "known", "list"])))]
pub struct Cli {
    /// Record store holding the state of every known target
    #[arg(short, long, default_value = "alive.toml")]
    pub config: PathBuf,

    /// Target to check, may be given several times
    #[arg(short, long = "url", value_name = "URL")]
    pub url: Vec<String>,

    /// Check every target already in the record store
    #[arg(short, long)]
    pub known: bool,

    /// List known targets and their state without checking them
    #[arg(short, long)]
    pub list: bool,

    /// Report results in order of probe duration
    #[arg(short, long)]
    pub strict: bool,

    /// Probe timeout in seconds, overrides the settings file
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Probe attempts per target, overrides the settings file
    #[arg(long)]
    pub tries: Option<u32>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Warn
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}
