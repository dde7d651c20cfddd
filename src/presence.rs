//! Presence payloads and the sink capability.
//!
//! Maps fetched media metadata into the status shown on the chat
//! profile. Three media kinds have a mapping:
//!
//! * movie: title, release year
//! * episode: "Show - Episode", "S1, E2"
//! * track: "Artist - Track", album title
//!
//! Anything else (photos, clips, live TV) has no sensible presence and
//! yields an `Unimplemented` error the caller swallows as "nothing to
//! show".

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    plex::protocol::{MediaMetadata, PlayState},
};

/// Branding asset key shown as the large presence image.
const LARGE_IMAGE: &str = "plex";

/// Hover text of the large presence image.
const LARGE_TEXT: &str = "Plex";

/// One status update for the presence sink.
///
/// Has no identity beyond the single send call.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Payload {
    /// First presence line.
    pub details: String,
    /// Second presence line.
    pub state: String,
    pub large_image: &'static str,
    pub large_text: &'static str,
    /// When playback effectively began; drives the elapsed-time display.
    pub start: Option<SystemTime>,
}

impl Payload {
    /// Builds the payload for a display-worthy transition.
    ///
    /// The elapsed-time anchor is only set while actively playing: for a
    /// paused or buffering session the position does not advance, so an
    /// elapsed timer would be misleading.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` for media kinds without a presence
    /// mapping.
    pub fn format(
        metadata: &MediaMetadata,
        state: PlayState,
        view_offset: Duration,
        now: SystemTime,
    ) -> Result<Self> {
        let (details, state_text) = match metadata.kind.as_str() {
            "movie" => (
                metadata.title.clone(),
                metadata.year.map(|year| year.to_string()).unwrap_or_default(),
            ),
            "episode" => (
                format!(
                    "{} - {}",
                    metadata.grandparent_title.as_deref().unwrap_or_default(),
                    metadata.title
                ),
                format!(
                    "S{}, E{}",
                    metadata.parent_index.unwrap_or_default(),
                    metadata.index.unwrap_or_default()
                ),
            ),
            "track" => (
                format!(
                    "{} - {}",
                    metadata.grandparent_title.as_deref().unwrap_or_default(),
                    metadata.title
                ),
                metadata.parent_title.clone().unwrap_or_default(),
            ),
            kind => {
                return Err(Error::unimplemented(format!(
                    "media kind {kind} cannot be shown as presence"
                )));
            }
        };

        let start = (state == PlayState::Playing).then(|| now - view_offset);

        Ok(Self {
            details,
            state: state_text,
            large_image: LARGE_IMAGE,
            large_text: LARGE_TEXT,
            start,
        })
    }

    /// The placeholder shown when the watched user plays nothing.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            details: "Nothing is playing".to_owned(),
            state: String::new(),
            large_image: LARGE_IMAGE,
            large_text: LARGE_TEXT,
            start: None,
        }
    }
}

/// Something that can display a presence payload.
///
/// The bridge holds this as a capability: connect once, update any number
/// of times, close on shutdown. Connection failures are not retried by
/// the bridge; a sink that cannot connect fails the run.
#[async_trait]
pub trait Sink {
    /// Establishes the connection to the display service.
    async fn connect(&mut self) -> Result<()>;

    /// Displays a payload, replacing whatever was shown before.
    async fn update(&mut self, payload: &Payload) -> Result<()>;

    /// Releases the connection.
    async fn close(&mut self);
}
