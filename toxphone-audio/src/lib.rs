/// Frame geometry, ring buffers and pipeline wiring
pub mod audio;

/// JSON configuration
pub mod config;

/// Synthetic end-to-end call
pub mod loopback;

/// Utility modules
pub mod utils;
