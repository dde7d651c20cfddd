//! Wire types for the plex.tv API and the Plex Media Server.
//!
//! Plex serialises numbers inconsistently: the same key arrives as an
//! integer in one payload and as a decimal string in another. Identifiers
//! are therefore parsed with `DisplayFromStr` where the server is known to
//! send strings, and kept as raw strings where the dedup rules need to
//! reject non-numeric values themselves.
//!
//! # Example notification
//!
//! ```json
//! {
//!     "NotificationContainer": {
//!         "type": "playing",
//!         "size": 1,
//!         "PlaySessionStateNotification": [{
//!             "sessionKey": "12",
//!             "ratingKey": "24913",
//!             "viewOffset": 91000,
//!             "state": "playing"
//!         }]
//!     }
//! }
//! ```

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use url::Url;
use veil::Redact;

/// Playback state as reported by the media server.
///
/// Anything the server may add in the future deserialises as
/// [`Unknown`](Self::Unknown) rather than failing the whole message.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Buffering,
    /// Default when a notification omits the state.
    #[default]
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Account data returned by plex.tv on sign-in or token validation.
#[derive(Clone, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[redact]
    pub auth_token: String,
}

/// A device known to plex.tv, server or otherwise.
#[derive(Clone, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    /// Comma-separated capability list, e.g. `"server"`.
    pub provides: String,
    /// Server-scoped access token for shared servers.
    #[redact]
    pub access_token: Option<String>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Resource {
    /// Whether this device provides the media-server capability.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.provides.split(',').any(|capability| capability == "server")
    }
}

/// One address a device can be reached on.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub uri: Url,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub relay: bool,
}

/// Generic envelope for Plex Media Server responses.
#[derive(Clone, Debug, Deserialize)]
pub struct MediaContainerWrapper<T> {
    #[serde(rename = "MediaContainer")]
    pub media_container: T,
}

/// Attributes of the server root resource (`GET /`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRoot {
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// plex.tv username of the server owner.
    #[serde(default)]
    pub my_plex_username: Option<String>,
}

/// Container of live playback sessions (`GET /status/sessions`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionContainer {
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<LiveSession>,
}

/// One live playback session on the server.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub session_key: Option<u64>,
    #[serde(rename = "User")]
    pub user: Option<SessionUser>,
}

/// User attributes attached to a live session.
#[derive(Clone, Debug, Deserialize)]
pub struct SessionUser {
    /// Plex username.
    pub title: String,
}

/// Container of library items (`GET /library/metadata/{key}`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<MediaMetadata>,
}

/// Metadata of a single library item, fetched once per display-worthy
/// transition.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Media kind: `movie`, `episode`, `track`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    /// Season or album title.
    #[serde(default)]
    pub parent_title: Option<String>,
    /// Show or artist title.
    #[serde(default)]
    pub grandparent_title: Option<String>,
    /// Season number.
    #[serde(default)]
    pub parent_index: Option<u32>,
    /// Episode or track number.
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub year: Option<u32>,
}

/// Top-level websocket message; everything the bridge cares about comes
/// wrapped in a `NotificationContainer`.
#[derive(Clone, Debug, Deserialize)]
pub struct AlertMessage {
    #[serde(rename = "NotificationContainer")]
    pub notification_container: Option<NotificationContainer>,
}

/// Contents of one push notification.
#[derive(Clone, Debug, Deserialize)]
pub struct NotificationContainer {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "PlaySessionStateNotification", default)]
    pub play_session_state: Vec<PlaySessionStateNotification>,
}

/// Raw playback state change as pushed by the server.
///
/// Keys are kept as raw strings here: the dedup rules discard events with
/// missing or non-numeric keys instead of failing deserialisation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySessionStateNotification {
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub rating_key: Option<String>,
    /// Playback position in milliseconds.
    #[serde(default)]
    pub view_offset: Option<u64>,
    #[serde(default)]
    pub state: Option<PlayState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_with_string_keys_parses() {
        let message: AlertMessage = serde_json::from_str(
            r#"{"NotificationContainer":{"type":"playing","size":1,
                "PlaySessionStateNotification":[{"sessionKey":"12",
                "ratingKey":"24913","viewOffset":91000,"state":"playing"}]}}"#,
        )
        .expect("alert message");

        let container = message.notification_container.expect("container");
        assert_eq!(container.kind, "playing");
        let notification = &container.play_session_state[0];
        assert_eq!(notification.session_key.as_deref(), Some("12"));
        assert_eq!(notification.rating_key.as_deref(), Some("24913"));
        assert_eq!(notification.view_offset, Some(91_000));
        assert_eq!(notification.state, Some(PlayState::Playing));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let container: NotificationContainer = serde_json::from_str(
            r#"{"type":"playing","PlaySessionStateNotification":[{"sessionKey":"3"}]}"#,
        )
        .expect("container");

        let notification = &container.play_session_state[0];
        assert_eq!(notification.state, None);
        assert_eq!(notification.view_offset, None);
        assert_eq!(PlayState::default(), PlayState::Stopped);
    }

    #[test]
    fn unknown_play_state_does_not_fail() {
        let state: PlayState = serde_json::from_str("\"transcoding\"").expect("state");
        assert_eq!(state, PlayState::Unknown);
    }

    #[test]
    fn sessions_parse_with_numeric_string_keys() {
        let wrapper: MediaContainerWrapper<SessionContainer> = serde_json::from_str(
            r#"{"MediaContainer":{"size":1,"Metadata":[
                {"sessionKey":"12","User":{"id":1,"title":"alice"}}]}}"#,
        )
        .expect("sessions");

        let session = &wrapper.media_container.metadata[0];
        assert_eq!(session.session_key, Some(12));
        assert_eq!(session.user.as_ref().map(|u| u.title.as_str()), Some("alice"));
    }

    #[test]
    fn resource_capability_list_is_split() {
        let resource: Resource = serde_json::from_str(
            r#"{"name":"Living Room","provides":"server,player","connections":[]}"#,
        )
        .expect("resource");
        assert!(resource.is_server());

        let resource: Resource =
            serde_json::from_str(r#"{"name":"Phone","provides":"player"}"#).expect("resource");
        assert!(!resource.is_server());
    }
}
