pub mod config_loader;
pub mod control;
pub mod coordinator;
pub mod git;
pub mod lease;
pub mod registry;
pub mod state;
pub mod traffic;
pub mod workspace;
