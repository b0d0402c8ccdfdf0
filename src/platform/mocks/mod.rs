//! Mocked platform services and listeners, for use in test

pub mod mock_callbacks;
pub mod mock_platform;
