//! Common functionality shared between Fruit system tools.

pub mod agent_config;
pub mod command;
pub mod mounts;
