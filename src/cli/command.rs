use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (mpegh ",
    env!("MPEGH_VERSION"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION,
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for inspecting MPEG-H 3D Audio MHAS bitstreams",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print stream information
    Info(InfoArgs),

    /// List MHAS packets
    Packets(PacketsArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input MHAS bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Input framing.
    #[arg(long, value_enum, default_value_t = Transport::Mhas)]
    pub transport: Transport,

    /// Print the summary as YAML.
    #[arg(long)]
    pub yaml: bool,

    /// Treat the next configuration as changed even if identical.
    #[arg(long)]
    pub force_config_change: bool,

    /// Average bitrate in bit/s, used to estimate lost access units.
    #[arg(long, value_name = "BITRATE")]
    pub bitrate: Option<u32>,

    /// CICP layout index of the rendering target.
    #[arg(long, value_name = "INDEX")]
    pub target_layout: Option<u8>,
}

#[derive(Debug, Args)]
pub struct PacketsArgs {
    /// Input MHAS bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Only list packets of this type.
    #[arg(long, value_name = "TYPE")]
    pub packet_type: Option<u32>,

    /// Stop after this many packets.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum Transport {
    /// Byte stream with sync packets.
    Mhas,
    /// Packet aligned input without sync search.
    Raw,
}
