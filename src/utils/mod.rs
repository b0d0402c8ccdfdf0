//! Utilities shared by the route thread

pub mod owned_handle;

#[cfg(test)]
pub mod task;
