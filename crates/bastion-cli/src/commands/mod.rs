//! Subcommand implementations.

pub(crate) mod modules;
