//! Data models for channels, auth grants, events, and presence.

pub mod auth;
pub mod channel;
pub mod event;
pub mod presence;

pub use auth::*;
pub use channel::*;
pub use event::*;
pub use presence::*;
