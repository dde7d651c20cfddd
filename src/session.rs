//! Session-state reconciliation.
//!
//! The media server pushes a noisy stream of playback notifications:
//! progress ticks every few seconds, duplicated state changes, events for
//! other users' sessions. This module decides which of those represent a
//! transition worth displaying.
//!
//! The [`Snapshot`] remembers the last displayed `(state, session key,
//! rating key)` triple. Feeding it a parsed [`PlaybackEvent`] yields an
//! [`Action`]:
//!
//! * [`Action::Ignore`]: noise, nothing changes
//! * [`Action::Clear`]: the displayed session stopped, show nothing
//! * [`Action::Update`]: a genuine transition; fetch metadata and update
//!   the presence
//!
//! Metadata fetches are the expensive part of the pipeline, so they must
//! only happen on genuine transitions.

use std::time::Duration;

use crate::plex::protocol::{LiveSession, NotificationContainer, PlayState};

/// What the bridge should do with an event.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// Discard the event; the snapshot is unchanged.
    Ignore,
    /// The displayed session stopped; the snapshot has been reset and the
    /// sink should show nothing playing.
    Clear,
    /// A display-worthy transition; the snapshot has been updated and a
    /// metadata fetch plus presence update is required.
    Update,
}

/// A normalised playback event, extracted from one push notification.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct PlaybackEvent {
    pub state: PlayState,
    pub session_key: u64,
    pub rating_key: u64,
    /// Playback position at the time of the event.
    pub view_offset: Duration,
}

impl PlaybackEvent {
    /// Extracts a playback event from a notification container.
    ///
    /// Returns `None` for anything that is not a well-formed playback
    /// notification: wrong container type, empty notification list,
    /// missing or non-numeric keys. Only the first entry of a
    /// multi-entry notification is considered.
    #[must_use]
    pub fn from_container(container: &NotificationContainer) -> Option<Self> {
        if container.kind != "playing" {
            return None;
        }

        // TODO: check whether trailing entries of a multi-entry
        // notification ever carry a different session; only the first
        // one is processed for now.
        let notification = container.play_session_state.first()?;

        let session_key = notification.session_key.as_deref()?;
        if session_key.is_empty() || !session_key.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let session_key = session_key.parse().ok()?;
        let rating_key = notification.rating_key.as_deref()?.parse().ok()?;

        Some(Self {
            state: notification.state.unwrap_or_default(),
            session_key,
            rating_key,
            view_offset: Duration::from_millis(notification.view_offset.unwrap_or(0)),
        })
    }
}

/// The last displayed playback state.
///
/// Single instance, owned by the bridge; all three fields change
/// together, which is what makes the no-op comparison sound.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Snapshot {
    displayed: Option<(PlayState, u64, u64)>,
}

impl Snapshot {
    /// An empty snapshot: nothing is displayed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything is currently displayed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.displayed.is_none()
    }

    /// Resets the snapshot to the empty state.
    pub fn clear(&mut self) {
        self.displayed = None;
    }

    /// Applies an event to the snapshot and decides what to do with it.
    ///
    /// Stop handling comes first: a stop for the displayed `(session,
    /// item)` pair clears the snapshot, a stop for anything else is
    /// noise. After that, an event identical to what is already displayed
    /// is ignored; this is the primary defence against the server
    /// re-delivering identical progress ticks. Everything else is a
    /// transition.
    pub fn apply(&mut self, event: &PlaybackEvent) -> Action {
        if event.state == PlayState::Stopped {
            let displayed_stopped = self.displayed.is_some_and(|(_, session_key, rating_key)| {
                session_key == event.session_key && rating_key == event.rating_key
            });

            if displayed_stopped {
                self.clear();
                return Action::Clear;
            }
            return Action::Ignore;
        }

        let next = (event.state, event.session_key, event.rating_key);
        if self.displayed == Some(next) {
            return Action::Ignore;
        }

        self.displayed = Some(next);
        Action::Update
    }
}

/// Whether the live session with the given key belongs to the given user.
///
/// Owner/admin accounts receive every user's events in one feed; the
/// bridge cross-checks the live session list and only mirrors sessions of
/// the configured user. Username comparison is case-insensitive, matching
/// how plex.tv treats usernames.
#[must_use]
pub fn session_belongs_to(sessions: &[LiveSession], session_key: u64, username: &str) -> bool {
    sessions
        .iter()
        .find(|session| session.session_key == Some(session_key))
        .and_then(|session| session.user.as_ref())
        .is_some_and(|user| user.title.eq_ignore_ascii_case(username))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plex::protocol::{PlaySessionStateNotification, SessionUser};

    fn container(kind: &str, entries: Vec<PlaySessionStateNotification>) -> NotificationContainer {
        NotificationContainer {
            kind: kind.to_owned(),
            play_session_state: entries,
        }
    }

    fn notification(
        state: Option<PlayState>,
        session_key: Option<&str>,
        rating_key: Option<&str>,
    ) -> PlaySessionStateNotification {
        PlaySessionStateNotification {
            session_key: session_key.map(str::to_owned),
            rating_key: rating_key.map(str::to_owned),
            view_offset: Some(1_000),
            state,
        }
    }

    fn event(state: PlayState, session_key: u64, rating_key: u64) -> PlaybackEvent {
        PlaybackEvent {
            state,
            session_key,
            rating_key,
            view_offset: Duration::from_secs(1),
        }
    }

    fn live_session(session_key: u64, username: &str) -> LiveSession {
        LiveSession {
            session_key: Some(session_key),
            user: Some(SessionUser {
                title: username.to_owned(),
            }),
        }
    }

    #[test]
    fn non_playing_container_is_rejected() {
        let container = container(
            "timeline",
            vec![notification(Some(PlayState::Playing), Some("1"), Some("2"))],
        );
        assert_eq!(PlaybackEvent::from_container(&container), None);
    }

    #[test]
    fn empty_notification_list_is_rejected() {
        let container = container("playing", vec![]);
        assert_eq!(PlaybackEvent::from_container(&container), None);
    }

    #[test]
    fn missing_or_non_numeric_session_key_is_rejected() {
        for session_key in [None, Some(""), Some("abc"), Some("-1"), Some("+1"), Some("1.5")] {
            let container = container(
                "playing",
                vec![notification(Some(PlayState::Playing), session_key, Some("2"))],
            );
            assert_eq!(
                PlaybackEvent::from_container(&container),
                None,
                "session key {session_key:?} should be rejected"
            );
        }
    }

    #[test]
    fn missing_rating_key_is_rejected() {
        let container = container(
            "playing",
            vec![notification(Some(PlayState::Playing), Some("1"), None)],
        );
        assert_eq!(PlaybackEvent::from_container(&container), None);
    }

    #[test]
    fn missing_state_defaults_to_stopped() {
        let container = container("playing", vec![notification(None, Some("1"), Some("2"))]);
        let event = PlaybackEvent::from_container(&container).expect("event");
        assert_eq!(event.state, PlayState::Stopped);
    }

    #[test]
    fn missing_view_offset_defaults_to_zero() {
        let mut entry = notification(Some(PlayState::Playing), Some("1"), Some("2"));
        entry.view_offset = None;
        let container = container("playing", vec![entry]);
        let event = PlaybackEvent::from_container(&container).expect("event");
        assert_eq!(event.view_offset, Duration::ZERO);
    }

    #[test]
    fn only_the_first_entry_is_processed() {
        let container = container(
            "playing",
            vec![
                notification(Some(PlayState::Paused), Some("1"), Some("2")),
                notification(Some(PlayState::Playing), Some("3"), Some("4")),
            ],
        );
        let event = PlaybackEvent::from_container(&container).expect("event");
        assert_eq!(event.session_key, 1);
        assert_eq!(event.state, PlayState::Paused);
    }

    #[test]
    fn first_play_is_an_update() {
        let mut snapshot = Snapshot::new();
        assert_eq!(
            snapshot.apply(&event(PlayState::Playing, 1, 2)),
            Action::Update
        );
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn identical_consecutive_events_update_once() {
        let mut snapshot = Snapshot::new();
        let tick = event(PlayState::Playing, 1, 2);
        assert_eq!(snapshot.apply(&tick), Action::Update);
        assert_eq!(snapshot.apply(&tick), Action::Ignore);
        assert_eq!(snapshot.apply(&tick), Action::Ignore);
    }

    #[test]
    fn state_transition_is_an_update() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(&event(PlayState::Playing, 1, 2));
        assert_eq!(
            snapshot.apply(&event(PlayState::Paused, 1, 2)),
            Action::Update
        );
        assert_eq!(
            snapshot.apply(&event(PlayState::Playing, 1, 2)),
            Action::Update
        );
    }

    #[test]
    fn item_change_within_session_is_an_update() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(&event(PlayState::Playing, 1, 2));
        assert_eq!(
            snapshot.apply(&event(PlayState::Playing, 1, 3)),
            Action::Update
        );
    }

    #[test]
    fn stop_of_displayed_session_clears_once() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(&event(PlayState::Playing, 1, 2));

        assert_eq!(
            snapshot.apply(&event(PlayState::Stopped, 1, 2)),
            Action::Clear
        );
        assert!(snapshot.is_empty());

        // Replaying the stop finds nothing displayed.
        assert_eq!(
            snapshot.apply(&event(PlayState::Stopped, 1, 2)),
            Action::Ignore
        );
    }

    #[test]
    fn stop_of_other_session_is_ignored() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(&event(PlayState::Playing, 1, 2));

        assert_eq!(
            snapshot.apply(&event(PlayState::Stopped, 3, 4)),
            Action::Ignore
        );
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn stop_on_empty_snapshot_is_ignored() {
        let mut snapshot = Snapshot::new();
        assert_eq!(
            snapshot.apply(&event(PlayState::Stopped, 1, 2)),
            Action::Ignore
        );
        assert!(snapshot.is_empty());
    }

    #[test]
    fn fan_in_filter_matches_configured_user() {
        let sessions = vec![live_session(1, "Alice"), live_session(2, "bob")];

        // Alice's session passes, case-insensitively.
        assert!(session_belongs_to(&sessions, 1, "alice"));

        // Bob's session key must not pass for Alice.
        assert!(!session_belongs_to(&sessions, 2, "alice"));

        // A session key absent from the live list does not pass.
        assert!(!session_belongs_to(&sessions, 3, "alice"));
    }

    #[test]
    fn fan_in_filter_requires_user_attributes() {
        let sessions = vec![LiveSession {
            session_key: Some(1),
            user: None,
        }];
        assert!(!session_belongs_to(&sessions, 1, "alice"));
    }
}
