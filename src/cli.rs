use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "printer-probe", version)]
/// Connectivity checks for network receipt and label printers
pub struct Args {
    /// JSON config with timeouts and printer profiles
    #[arg(long, env = "TARGET_CONFIG", default_value = "printers.json")]
    pub config: String,

    /// Overrides `log_level` from the config file
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    pub log_json: bool,

    /// Print results as JSON instead of text lines
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Where to connect: explicit flags, or a named profile from the config.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Printer IP address or hostname
    #[arg(long)]
    pub host: Option<String>,

    /// Comma-separated ports, e.g. "9100, 80"
    #[arg(long)]
    pub ports: Option<String>,

    /// Take host and ports from this printer profile
    #[arg(long)]
    pub profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Test TCP connectivity to each port, one at a time
    Ports {
        #[command(flatten)]
        target: TargetArgs,
        /// Per-port connect timeout (default from config, 5000)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a test print job to the first port
    Print {
        #[command(flatten)]
        target: TargetArgs,
        /// Send this text verbatim instead of the test page
        #[arg(long, conflicts_with = "file")]
        raw: Option<String>,
        /// Send this file's bytes verbatim instead of the test page
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// ICMP ping the printer host
    Ping {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Probe every network profile on an interval and serve metrics
    ///
    /// Profiles and timeouts are reloaded live. The probe interval, metrics
    /// address and latency history switch only take effect on restart.
    Watch,
    /// List configured printer profiles
    Profiles,
}
