//! Subcommand implementations.

pub mod inspect;
pub mod install;
pub mod pack;
