pub mod cli;

pub use cli::{build_cli_command, parse_start, BatchArgs, Cli, Commands, RunArgs, SolveArgs};
