//! CLI Adapter
//!
//! Command-line interface for swapwatch.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    check_config_command, load_or_default, parse_command, run_command, CheckConfigCmd, CliApp,
    Command, ParseCmd, RunCmd, DEFAULT_CONFIG_PATH,
};
