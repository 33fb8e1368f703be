pub mod artifacts;
pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod review;
pub mod session;
pub mod ui;
pub mod util;
