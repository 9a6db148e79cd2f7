//! Utility modules

pub mod config;
pub mod link;
pub mod logger;
