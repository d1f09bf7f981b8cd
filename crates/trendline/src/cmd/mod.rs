//! CLI subcommands

pub mod run;
