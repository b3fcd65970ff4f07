use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the vellum binary.
#[derive(Debug, Parser)]
#[command(name = "vellum", version, about = "vellum development server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VELLUM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the development server (default).
    Dev(Box<DevArgs>),
    /// Print the route table in priority order.
    Routes(RoutesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DevArgs {
    #[command(flatten)]
    pub overrides: DevOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ProjectOverride {
    /// Override the project root directory.
    #[arg(long = "root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DevOverrides {
    #[command(flatten)]
    pub project: ProjectOverride,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the mount base path.
    #[arg(long = "base", value_name = "PATH")]
    pub base: Option<String>,

    /// Override the trailing slash policy (always|never|ignore).
    #[arg(long = "trailing-slash", value_name = "POLICY")]
    pub trailing_slash: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the filesystem polling interval.
    #[arg(long = "watch-interval-ms", value_name = "MILLIS")]
    pub watch_interval_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RoutesArgs {
    #[command(flatten)]
    pub project: ProjectOverride,

    /// Print the table as JSON instead of text.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}
