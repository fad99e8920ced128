// Error taxonomy
pub mod error;

// Configuration loading
pub mod config;

// Token configs, encryption and persistence
pub mod credentials;

// Access tokens, exchange and expiry
pub mod token;

// Persisted auto-refresh bound
pub mod refresh;

// Encrypted config export/import
pub mod export;

pub use error::{Result, TokenError};
