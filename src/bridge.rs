//! Bridge between a Plex Media Server and a rich-presence sink.
//!
//! [`Bridge::run`] drives the whole lifecycle: authenticate against
//! plex.tv (retrying transient failures), connect the presence sink,
//! open the notification feed, then mirror playback transitions until
//! the feed drops or the process is interrupted.
//!
//! Events are handled strictly one at a time. Each notification runs to
//! completion, including its metadata fetch and sink update, before the
//! next one is read from the feed. The [`Snapshot`] relies on this
//! serialization instead of carrying its own locking.

use std::{sync::Arc, time::SystemTime};

use crate::{
    config::Config,
    error::{ErrorKind, Result},
    http::Client as HttpClient,
    plex::{
        protocol::NotificationContainer, Account, AlertListener, MediaSource, Server,
    },
    presence::{Payload, Sink},
    readiness::{Readiness, Waiter},
    retry::RetryPolicy,
    session::{session_belongs_to, Action, PlaybackEvent, Snapshot},
};

/// The running state of one bridge process.
pub struct Bridge<S> {
    config: Config,
    http_client: Arc<HttpClient>,
    sink: S,
    retry: RetryPolicy,
    readiness: Readiness,
    snapshot: Snapshot,
}

impl<S> Bridge<S>
where
    S: Sink,
{
    /// Creates a bridge with the production retry schedule.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: Config, sink: S) -> Result<Self> {
        let http_client = Arc::new(HttpClient::new(&config)?);

        Ok(Self {
            config,
            http_client,
            sink,
            retry: RetryPolicy::fixed(),
            readiness: Readiness::new(),
            snapshot: Snapshot::new(),
        })
    }

    /// Replaces the retry schedule for the Plex connection.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A handle that unblocks once the bridge is fully connected.
    ///
    /// [`run`](Self::run) sequences its own startup and never waits on
    /// this; the handle exists for external consumers (health checks,
    /// tests) and can be taken any number of times, before or after the
    /// signal fires.
    #[must_use]
    pub fn waiter(&self) -> Waiter {
        self.readiness.waiter()
    }

    /// Connects both sides and mirrors playback until the feed drops.
    ///
    /// The Plex side is retried per the configured schedule. The sink
    /// connection is a different failure domain and is not retried: the
    /// local client is either running or it is not, and polling for it
    /// would mask a misconfiguration.
    ///
    /// # Errors
    ///
    /// Returns error when the sink connection fails, when the retry
    /// schedule runs out, or when the notification feed disconnects.
    pub async fn run(&mut self) -> Result<()> {
        let (account, server) = self.connect_plex().await?;
        info!(
            "logged in as {}, watching {} for sessions of {}",
            account.username,
            server.name(),
            self.config.username
        );

        self.sink.connect().await?;

        let mut listener = AlertListener::connect(&server.websocket_url()?).await?;
        self.readiness.signal();
        info!("listening for playback notifications");

        // Owner accounts receive every user's events in one feed and need
        // the live-session cross-check on each event.
        let admin = account.owns(server.owner_username());
        if admin {
            debug!("account owns the server; filtering sessions by username");
        }

        loop {
            let container = listener.next().await?;
            if let Err(e) = self.process(&server, admin, &container).await {
                error!("error processing notification: {e}");
            }
        }
    }

    /// Releases the sink connection. Call on shutdown.
    pub async fn stop(&mut self) {
        self.sink.close().await;
    }

    /// Authenticates and connects to the media server, retrying per the
    /// schedule.
    async fn connect_plex(&self) -> Result<(Account, Server)> {
        let mut delays = self.retry.delays();
        loop {
            match self.try_connect_plex().await {
                Ok(connected) => break Ok(connected),
                Err(e) => {
                    warn!("failed to connect to Plex: {e}");
                    let Some(delay) = delays.next() else {
                        break Err(e);
                    };
                    info!("retrying in {:.0}s", delay.as_secs_f32());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect_plex(&self) -> Result<(Account, Server)> {
        let account = Account::login(&self.http_client, &self.config).await?;
        let server = Server::connect(Arc::clone(&self.http_client), &account, &self.config).await?;
        Ok((account, server))
    }

    /// Runs one notification through the deduplication pipeline.
    ///
    /// When the fetch or the sink call behind a transition fails, the
    /// snapshot is rolled back to its previous state so a re-delivered
    /// tick retries the update instead of being deduplicated away.
    async fn process<M>(
        &mut self,
        server: &M,
        admin: bool,
        container: &NotificationContainer,
    ) -> Result<()>
    where
        M: MediaSource + Sync,
    {
        let Some(event) = PlaybackEvent::from_container(container) else {
            trace!("ignoring {} notification", container.kind);
            return Ok(());
        };

        if admin {
            let sessions = server.sessions().await?;
            if !session_belongs_to(&sessions, event.session_key, &self.config.username) {
                debug!("ignoring session {} of another user", event.session_key);
                return Ok(());
            }
        }

        let previous = self.snapshot.clone();
        match self.snapshot.apply(&event) {
            Action::Ignore => trace!("no display-worthy change in session {}", event.session_key),

            Action::Clear => {
                info!("session {} stopped", event.session_key);
                if let Err(e) = self.sink.update(&Payload::idle()).await {
                    self.snapshot = previous;
                    return Err(e);
                }
            }

            Action::Update => {
                if let Err(e) = self.update_presence(server, &event).await {
                    self.snapshot = previous;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Fetches metadata and pushes the payload for one transition.
    async fn update_presence<M>(&mut self, server: &M, event: &PlaybackEvent) -> Result<()>
    where
        M: MediaSource + Sync,
    {
        let metadata = server.metadata(event.rating_key).await?;

        match Payload::format(&metadata, event.state, event.view_offset, SystemTime::now()) {
            Ok(payload) => {
                info!("{:?}: {}", event.state, payload.details);
                self.sink.update(&payload).await
            }
            // Media kinds without a presence mapping are skipped, not
            // fatal; the snapshot stays committed so identical ticks of
            // the same session do not refetch.
            Err(e) if e.kind == ErrorKind::Unimplemented => {
                debug!("{e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::{
        config::Credential,
        error::Error,
        plex::protocol::{
            LiveSession, MediaMetadata, PlaySessionStateNotification, PlayState, SessionUser,
        },
    };

    /// Sink that records every payload it is given.
    #[derive(Default)]
    struct RecordingSink {
        payloads: Vec<Payload>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn update(&mut self, payload: &Payload) -> Result<()> {
            if self.fail {
                return Err(Error::unavailable("sink lost"));
            }
            self.payloads.push(payload.clone());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct FakeServer {
        sessions: Vec<LiveSession>,
        metadata: HashMap<u64, MediaMetadata>,
    }

    #[async_trait]
    impl MediaSource for FakeServer {
        async fn sessions(&self) -> Result<Vec<LiveSession>> {
            Ok(self.sessions.clone())
        }

        async fn metadata(&self, rating_key: u64) -> Result<MediaMetadata> {
            self.metadata
                .get(&rating_key)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("no metadata for rating key {rating_key}")))
        }
    }

    fn bridge() -> Bridge<RecordingSink> {
        let config = Config {
            app_name: "plexrp".to_owned(),
            app_version: "0.0.0".to_owned(),
            server: None,
            username: "alice".to_owned(),
            credential: Credential::Token("t0ken".to_owned()),
            client_id: 1,
            device_id: Uuid::new_v4(),
            user_agent: "plexrp/0.0.0".to_owned(),
        };
        Bridge::new(config, RecordingSink::default()).expect("bridge")
    }

    fn container(state: PlayState, session_key: u64, rating_key: u64) -> NotificationContainer {
        NotificationContainer {
            kind: "playing".to_owned(),
            play_session_state: vec![PlaySessionStateNotification {
                session_key: Some(session_key.to_string()),
                rating_key: Some(rating_key.to_string()),
                view_offset: Some(1_000),
                state: Some(state),
            }],
        }
    }

    fn movie(title: &str) -> MediaMetadata {
        MediaMetadata {
            kind: "movie".to_owned(),
            title: title.to_owned(),
            year: Some(1995),
            ..MediaMetadata::default()
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

    #[tokio::test]
    async fn replayed_event_updates_sink_once() {
        let server = FakeServer {
            sessions: vec![],
            metadata: HashMap::from([(2, movie("Heat"))]),
        };
        let mut bridge = bridge();

        let tick = container(PlayState::Playing, 1, 2);
        bridge.process(&server, false, &tick).await.expect("first");
        bridge.process(&server, false, &tick).await.expect("replay");

        assert_eq!(bridge.sink.payloads.len(), 1);
        assert_eq!(bridge.sink.payloads[0].details, "Heat");
    }

    #[tokio::test]
    async fn admin_feed_only_mirrors_configured_user() {
        let server = FakeServer {
            sessions: vec![live_session(1, "alice"), live_session(2, "bob")],
            metadata: HashMap::from([(10, movie("Heat"))]),
        };
        let mut bridge = bridge();

        // Bob's session arrives on the owner feed but must not show up.
        bridge
            .process(&server, true, &container(PlayState::Playing, 2, 10))
            .await
            .expect("bob");
        assert!(bridge.sink.payloads.is_empty());

        bridge
            .process(&server, true, &container(PlayState::Playing, 1, 10))
            .await
            .expect("alice");
        assert_eq!(bridge.sink.payloads.len(), 1);
    }

    #[tokio::test]
    async fn stop_of_displayed_session_clears_presence() {
        let server = FakeServer {
            sessions: vec![],
            metadata: HashMap::from([(2, movie("Heat"))]),
        };
        let mut bridge = bridge();

        bridge
            .process(&server, false, &container(PlayState::Playing, 1, 2))
            .await
            .expect("play");
        bridge
            .process(&server, false, &container(PlayState::Stopped, 1, 2))
            .await
            .expect("stop");

        assert_eq!(bridge.sink.payloads.len(), 2);
        assert_eq!(bridge.sink.payloads[1].details, "Nothing is playing");
    }

    #[tokio::test]
    async fn unsupported_media_kind_is_skipped() {
        let mut photo = movie("Holiday");
        photo.kind = "photo".to_owned();
        let server = FakeServer {
            sessions: vec![],
            metadata: HashMap::from([(2, photo)]),
        };
        let mut bridge = bridge();

        let tick = container(PlayState::Playing, 1, 2);
        bridge.process(&server, false, &tick).await.expect("first");
        bridge.process(&server, false, &tick).await.expect("replay");

        assert!(bridge.sink.payloads.is_empty());
    }

    #[tokio::test]
    async fn failed_update_is_retried_on_the_next_tick() {
        let server = FakeServer {
            sessions: vec![],
            metadata: HashMap::from([(2, movie("Heat"))]),
        };
        let mut bridge = bridge();
        bridge.sink.fail = true;

        let tick = container(PlayState::Playing, 1, 2);
        bridge
            .process(&server, false, &tick)
            .await
            .expect_err("sink is down");
        assert!(bridge.sink.payloads.is_empty());

        // The transition was not committed, so the re-delivered tick
        // goes through the full update path once the sink recovers.
        bridge.sink.fail = false;
        bridge.process(&server, false, &tick).await.expect("retry");
        assert_eq!(bridge.sink.payloads.len(), 1);
        assert_eq!(bridge.sink.payloads[0].details, "Heat");
    }
}
