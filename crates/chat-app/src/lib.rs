#![deny(unsafe_code)]

//! Session coordinator for the parley chat client.
//!
//! [`session`] owns the running store and serializes fetch results and live messages onto
//! one task. [`settings`] loads the layered client configuration.

pub mod session;
pub mod settings;

pub use session::{LiveIngest, SessionHandle, SessionWorker, create_session};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
