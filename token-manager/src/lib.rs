//! Token Manager - keeps an access token alive for the selected config.
//!
//! Wraps the `tokensmith` core (configs, encryption, token exchange) with the
//! stateful parts: the current token, a one-second countdown, and a bounded
//! auto-refresh scheduler, exposed to a local UI over HTTP.
//!
//! # Architecture
//!
//! ```text
//!          UI (HTTP / events)
//!                 ↓
//! ┌─────────────────────────────────────────┐
//! │            TokenService                  │
//! │  - Config CRUD, selection, lock/unlock   │
//! │  - Manual generate with in-flight guard  │
//! │  - Owns token, countdown, refresh loop   │
//! └─────────────────────────────────────────┘
//!        ↓                ↓               ↓
//!  CredentialStore   TokenGenerator   ConfigRepository
//!  (+ decrypt cache)  (HTTP POST)        (SQLite)
//! ```
//!
//! # Core Types
//!
//! - [`TokenService`] - the service object; cheap to clone
//! - [`AutoRefresh`] / [`SchedulerState`] - the auto-refresh state machine
//! - [`ServiceEvent`] - everything subscribers can observe

pub mod api;
pub mod countdown;
pub mod events;
pub mod scheduler;
pub mod service;

pub use events::{spawn_threshold_listener, ServiceEvent};
pub use scheduler::{AutoRefresh, SchedulerState};
pub use service::{AutoRefreshStatus, ServiceSettings, TokenService, TokenStatus};
