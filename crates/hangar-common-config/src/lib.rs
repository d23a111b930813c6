//! Configuration for Hangar.
//!
//! Everything lives under one home directory (`$HANGAR_HOME`, default
//! `~/.hangar`). `config.yaml` there may override individual directories,
//! seed repositories and tune timeouts.

pub mod env;
pub mod loader;
pub mod types;


pub use env::*;
pub use loader::*;
pub use types::*;
