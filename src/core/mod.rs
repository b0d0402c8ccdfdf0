//! Shared data-types and utility methods go here.

pub mod address;
pub mod device;
pub mod local_log;
