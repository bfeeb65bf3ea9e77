pub mod cli;
pub mod common;
pub mod config;
pub mod downloader;

pub use config::QueueConfig;
pub use downloader::error::{DownloadError, Result};
