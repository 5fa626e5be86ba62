pub mod cli;
pub mod dispatch;
pub mod events;
pub mod logging;
pub mod status;
