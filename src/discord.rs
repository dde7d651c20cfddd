//! Rich-presence sink backed by a local Discord client.
//!
//! Talks to the Discord desktop app over its local IPC socket. The
//! handshake only succeeds while the app is running and logged in; the
//! bridge treats a failed handshake as fatal and exits rather than
//! polling for the app to appear.

use std::time::Duration;

use async_trait::async_trait;
use discord_sdk::{
    activity::{ActivityBuilder, Assets},
    wheel::{UserState, Wheel},
    Discord, Subscriptions,
};

use crate::{
    error::{Error, Result},
    presence::{Payload, Sink},
};

/// How long to wait for the local client to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A rich-presence connection to the local Discord client.
pub struct DiscordSink {
    application_id: i64,
    client: Option<Discord>,
}

impl DiscordSink {
    /// Creates an unconnected sink for the given application.
    #[must_use]
    pub fn new(application_id: i64) -> Self {
        Self {
            application_id,
            client: None,
        }
    }

    fn client(&self) -> Result<&Discord> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("presence sink is not connected"))
    }
}

#[async_trait]
impl Sink for DiscordSink {
    /// Opens the IPC connection and waits for the handshake.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when no local client answers and
    /// `DeadlineExceeded` when the handshake does not complete in time.
    async fn connect(&mut self) -> Result<()> {
        let (wheel, handler) = Wheel::new(Box::new(|e| {
            warn!("presence event error: {e}");
        }));
        let mut user = wheel.user();

        let client = Discord::new(self.application_id, Subscriptions::ACTIVITY, Box::new(handler))?;

        let state = tokio::time::timeout(HANDSHAKE_TIMEOUT, user.0.changed()).await?;
        state.map_err(|_| Error::unavailable("local client went away during the handshake"))?;

        match &*user.0.borrow() {
            UserState::Connected(user) => info!("rich presence connected as {}", user.username),
            UserState::Disconnected(e) => {
                return Err(Error::unavailable(format!("local client handshake: {e}")));
            }
        }

        self.client = Some(client);
        Ok(())
    }

    async fn update(&mut self, payload: &Payload) -> Result<()> {
        let mut activity = ActivityBuilder::new()
            .details(payload.details.clone())
            .state(payload.state.clone())
            .assets(
                Assets::default().large(payload.large_image, Some(payload.large_text.to_owned())),
            );

        if let Some(start) = payload.start {
            activity = activity.timestamps(Some(start), None::<std::time::SystemTime>);
        }

        self.client()?.update_activity(activity).await?;
        trace!("presence updated: {payload:?}");

        Ok(())
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.disconnect().await;
            debug!("rich presence disconnected");
        }
    }
}
