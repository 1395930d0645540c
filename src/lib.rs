pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod monitor;
pub mod orchestration;
pub mod profiler;
pub mod util;
pub mod worker;
pub mod workflow;

pub use error::{Error, Result};
