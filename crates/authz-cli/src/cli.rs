use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "authz",
    version,
    about = "Validate attribute-based policy bundles and check requests against them"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "authz.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate a policy bundle, then print a summary
    Validate {
        /// Path to the policy bundle (overrides config file setting)
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Authorize a request and print the response
    Check {
        /// Path to the policy bundle (overrides config file setting)
        #[arg(short, long)]
        policy: Option<PathBuf>,

        /// JSON or YAML file holding `subject` and the request fields
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Evaluate a single rule against a request and explain the outcome
    Explain {
        /// Path to the policy bundle (overrides config file setting)
        #[arg(short, long)]
        policy: Option<PathBuf>,

        /// Rule name or id
        #[arg(long)]
        rule: String,

        /// JSON or YAML file holding `subject` and the request fields
        #[arg(short, long)]
        request: PathBuf,
    },
}

impl Command {
    /// The `--policy` override, if one was given.
    pub fn policy_override(&self) -> Option<&PathBuf> {
        match self {
            Command::Validate { policy }
            | Command::Check { policy, .. }
            | Command::Explain { policy, .. } => policy.as_ref(),
        }
    }
}
