//! Command-line definition for the `taskmon` binary.

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;

/// Registry selection shared by every subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryArgs {
    /// Shared-memory namespace of the task table
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Slot count used when the table has to be created
    #[arg(long, global = true)]
    pub capacity: Option<usize>,

    /// Use a private in-process table instead of shared memory
    #[arg(long, global = true)]
    pub in_process: bool,

    /// Log filter (trace, debug, info, warn, error); defaults to RUST_LOG
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// taskmon - shared task table and `ps`-style inspection
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskmon",
    about = "Shared task-monitoring registry with a ps-style inspector",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(flatten)]
    pub registry: RegistryArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List registered tasks, as the UNIX counterpart
    Ps {
        /// Filters: application name, task slot, or pid
        #[arg(value_name = "TOKEN")]
        tokens: Vec<String>,

        /// Highlight tasks whose status contains TEXT
        #[arg(long, value_name = "TEXT")]
        grep: Option<String>,

        /// Select tasks owned by this pid
        #[arg(long = "pid", value_name = "PID")]
        pids: Vec<u32>,

        /// Select this task slot with its ancestors and descendants
        #[arg(long = "task", value_name = "SLOT")]
        tasks: Vec<usize>,

        /// Print selected rows as JSON
        #[arg(long)]
        json: bool,

        /// Disable colors
        #[arg(long)]
        no_color: bool,
    },

    /// Run a demonstration writer that reports progress
    Worker {
        /// Application name of the root task
        #[arg(long, default_value = "worker")]
        name: String,

        /// Number of child tasks
        #[arg(long, default_value_t = 2)]
        children: usize,

        /// Progress steps per task
        #[arg(long, default_value_t = 10)]
        steps: u32,

        /// Delay between steps
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },

    /// Release slots whose owning process has exited
    Sweep,

    /// Remove the shared task table
    Clean,
}

impl Cli {
    /// Parse the process arguments (clap prints usage and exits on error).
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse a custom argv (used by tests).
    pub fn try_parse_args_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_with_filters() {
        let cli = Cli::try_parse_args_from([
            "taskmon", "ps", "sim", "3", "--grep", "queued", "--pid", "42", "--no-color",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Ps {
                tokens: vec!["sim".to_string(), "3".to_string()],
                grep: Some("queued".to_string()),
                pids: vec![42],
                tasks: vec![],
                json: false,
                no_color: true,
            }
        );
    }

    #[test]
    fn test_global_registry_flags_after_subcommand() {
        let cli = Cli::try_parse_args_from([
            "taskmon",
            "sweep",
            "--namespace",
            "taskmon-test",
            "--capacity",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Sweep);
        assert_eq!(cli.registry.namespace.as_deref(), Some("taskmon-test"));
        assert_eq!(cli.registry.capacity, Some(8));
    }

    #[test]
    fn test_worker_defaults() {
        let cli = Cli::try_parse_args_from(["taskmon", "worker", "--in-process"]).unwrap();
        assert!(cli.registry.in_process);
        assert_eq!(
            cli.command,
            Commands::Worker {
                name: "worker".to_string(),
                children: 2,
                steps: 10,
                interval_ms: 200,
            }
        );
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_args_from(["taskmon"]).is_err());
    }
}
