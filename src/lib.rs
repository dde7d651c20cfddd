//! Mirrors Plex playback as Discord rich presence.
//!
//! The bridge authenticates against plex.tv, follows the push-notification
//! feed of one Plex Media Server, and reflects the configured user's
//! playback (movies, episodes, music) on their Discord profile.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod bridge;
pub mod config;
pub mod discord;
pub mod error;
pub mod http;
pub mod plex;
pub mod presence;
pub mod readiness;
pub mod retry;
pub mod session;
