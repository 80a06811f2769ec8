//! Command-line interface definitions for the tunnelctl demo shell.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Front-end shell for a local traffic-interception session.
///
/// Binds the session controller to an in-process tunnel service, installs
/// the trust anchor, runs the consent gate, then connects with a port-based
/// traffic filter and logs every session state transition.
#[derive(Parser, Debug)]
#[command(name = "tunnelctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to an additional config file, merged on top of the user config.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User identifier stamped on captured packets.
    #[arg(long, value_name = "ID")]
    pub user_id: Option<String>,

    /// Authentication token forwarded to the tunnel service.
    #[arg(long, value_name = "TOKEN")]
    pub auth_token: Option<String>,

    /// Answer the consent prompt with a denial instead of a grant.
    #[arg(long)]
    pub deny_consent: bool,

    /// Skip the startup trust-anchor installation.
    #[arg(long)]
    pub skip_trust_install: bool,

    /// Make the tunnel service refuse the connect attempt with this reason,
    /// to exercise the error path.
    #[arg(long, value_name = "REASON")]
    pub refuse_connect: Option<String>,

    /// Seconds to keep the session connected before disconnecting.
    #[arg(long, default_value_t = 3, value_name = "SECS")]
    pub run_secs: u64,
}
