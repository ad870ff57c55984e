//! Server-side business logic: password gate and channel signing.

pub mod authenticator;
pub mod gate;

pub use authenticator::ChannelAuthenticator;
pub use gate::CredentialGate;
