//! Plex collaborators: account sign-in, server access and the
//! notification feed.
//!
//! Everything that talks to plex.tv or a Plex Media Server lives here.
//! The core session logic only sees the typed values these modules
//! produce; transport details stay behind this boundary.

pub mod account;
pub mod notifications;
pub mod protocol;
pub mod server;

pub use account::Account;
pub use notifications::AlertListener;
pub use server::{MediaSource, Server};
