//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Bearer-token authorizer for API gateways
#[derive(Parser, Debug)]
#[command(name = "token-authorizer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOKEN_AUTHORIZER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TOKEN_AUTHORIZER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOKEN_AUTHORIZER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TOKEN_AUTHORIZER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOKEN_AUTHORIZER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the authorizer server (default)
    Serve,

    /// Authorize a single token against the configured store and print the policy
    Check {
        /// Raw bearer token
        #[arg(env = "TOKEN_AUTHORIZER_CHECK_TOKEN")]
        token: String,

        /// Method ARN the verdict applies to
        #[arg(short, long, default_value = "*")]
        resource: String,
    },

    /// Print the store fingerprint of a raw token
    Fingerprint {
        /// Raw bearer token
        #[arg(required = true)]
        token: String,
    },
}
