#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod dependants;
pub mod error;
pub mod events;
pub mod feed;
pub mod formats;
pub mod hooks;
pub mod jobs;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod toc;
pub mod watch;

pub use error::ScrapeError;
