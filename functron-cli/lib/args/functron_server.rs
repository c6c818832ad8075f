use std::{net::IpAddr, path::PathBuf};

use clap::Parser;
use functron_utils::DEFAULT_POLL_INTERVAL_SECS;

use crate::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Arguments for the functron-server command
#[derive(Debug, Parser)]
#[command(name = "functron-server", author, version, styles=styles::styles())]
pub struct FunctronServerArgs {
    /// JSON configuration file with the port, slots and repositron URL
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port number to listen on, overriding the configuration file
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Path of the SQLite image store
    #[arg(long = "db")]
    pub db_path: Option<PathBuf>,

    /// Directory invocation and build contexts are staged under
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Seed for temporary image names
    #[arg(long)]
    pub seed: Option<u64>,

    /// Longest the build scheduler sleeps between ticks, in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Do not run the build scheduler in this process
    #[arg(long, default_value_t = false)]
    pub no_scheduler: bool,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
