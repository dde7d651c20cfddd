//! Access to one Plex Media Server.
//!
//! A [`Server`] is built by discovering the account's devices on plex.tv,
//! picking the configured server and probing its advertised connections
//! until one answers. It then serves the three queries the bridge needs:
//! the owner's username, the live session list, and per-item metadata.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::{self, Client as HttpClient},
    plex::{
        account::Account,
        protocol::{
            LiveSession, MediaContainerWrapper, MediaMetadata, MetadataContainer, Resource,
            ServerRoot, SessionContainer,
        },
    },
};

/// Device directory on plex.tv.
const RESOURCES_URL: &str = "https://plex.tv/api/v2/resources?includeHttps=1";

/// Path of the push-notification websocket.
const NOTIFICATIONS_PATH: &str = "/:/websockets/notifications";

/// The queries the event pipeline runs against the media server.
///
/// Split out as a capability, like the presence sink, so the pipeline
/// can be driven without a live server.
#[async_trait]
pub trait MediaSource {
    /// Live playback sessions currently known to the server.
    async fn sessions(&self) -> Result<Vec<LiveSession>>;

    /// Metadata of a single library item.
    async fn metadata(&self, rating_key: u64) -> Result<MediaMetadata>;
}

/// A reachable, authenticated Plex Media Server.
pub struct Server {
    http_client: Arc<HttpClient>,
    name: String,
    base: Url,
    token: String,
    owner: Option<String>,
}

impl Server {
    /// Discovers and connects to the configured server.
    ///
    /// Shared servers come with their own scoped access token; owned
    /// servers are accessed with the account token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no matching server device exists,
    /// `FailedPrecondition` if no server name is configured while the
    /// account has access to more than one, and `Unavailable` if none of
    /// the advertised connections answer.
    pub async fn connect(
        http_client: Arc<HttpClient>,
        account: &Account,
        config: &Config,
    ) -> Result<Self> {
        let resources = Self::resources(&http_client, account.token()).await?;

        let mut servers: Vec<Resource> = resources
            .into_iter()
            .filter(Resource::is_server)
            .collect();

        let resource = match &config.server {
            Some(name) => servers
                .into_iter()
                .find(|server| server.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::not_found(format!("server {name} not found on plex.tv")))?,
            None if servers.len() == 1 => servers.remove(0),
            None => {
                return Err(Error::failed_precondition(format!(
                    "account has access to {} servers; set `server` in the settings",
                    servers.len()
                )));
            }
        };

        let token = resource
            .access_token
            .clone()
            .unwrap_or_else(|| account.token().to_owned());

        // Relay connections are a tunnel of last resort; probe them only
        // after every direct connection failed.
        let mut connections = resource.connections.clone();
        connections.sort_by_key(|connection| connection.relay);

        let mut base = None;
        for connection in &connections {
            debug!("probing {}", connection.uri);
            match Self::probe(&http_client, &connection.uri, &token).await {
                Ok(()) => {
                    base = Some(connection.uri.clone());
                    break;
                }
                Err(e) => debug!("connection {} unusable: {e}", connection.uri),
            }
        }
        let base = base.ok_or_else(|| {
            Error::unavailable(format!("no usable connection to server {}", resource.name))
        })?;

        let mut server = Self {
            http_client,
            name: resource.name,
            base,
            token,
            owner: None,
        };

        let root: MediaContainerWrapper<ServerRoot> = server.fetch("/").await?;
        server.owner = root.media_container.my_plex_username;

        Ok(server)
    }

    async fn resources(http_client: &HttpClient, token: &str) -> Result<Vec<Resource>> {
        let url = RESOURCES_URL.parse::<reqwest::Url>()?;
        let mut request = http_client.get(url, "");
        request
            .headers_mut()
            .try_insert(http::HEADER_TOKEN, HeaderValue::from_str(token)?)?;

        let response = http_client.execute(request).await?;
        let response = response.error_for_status()?;
        response.json::<Vec<Resource>>().await.map_err(Into::into)
    }

    /// Checks that a connection URI answers the unauthenticated identity
    /// endpoint.
    async fn probe(http_client: &HttpClient, uri: &Url, token: &str) -> Result<()> {
        let url = uri.join("identity")?;
        let mut request = http_client.get(url, "");
        request
            .headers_mut()
            .try_insert(http::HEADER_TOKEN, HeaderValue::from_str(token)?)?;

        let response = http_client.execute(request).await?;
        response.error_for_status()?;
        Ok(())
    }

    /// Performs an authenticated GET against the server and parses the
    /// JSON response.
    async fn fetch<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self.base.join(path)?;
        let mut request = self.http_client.get(url, "");
        request
            .headers_mut()
            .try_insert(http::HEADER_TOKEN, HeaderValue::from_str(&self.token)?)?;

        let response = self.http_client.execute(request).await?;
        let response = response.error_for_status()?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// Server name as shown on plex.tv.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// plex.tv username of the server owner, when the server reports one.
    #[must_use]
    pub fn owner_username(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// URL of the push-notification websocket, with the token attached.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be turned into a websocket
    /// URL.
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = self.base.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::internal("cannot derive websocket scheme"))?;
        url.set_path(NOTIFICATIONS_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("X-Plex-Token", &self.token);

        Ok(url)
    }
}

#[async_trait]
impl MediaSource for Server {
    async fn sessions(&self) -> Result<Vec<LiveSession>> {
        let wrapper: MediaContainerWrapper<SessionContainer> =
            self.fetch("/status/sessions").await?;
        Ok(wrapper.media_container.metadata)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the server answers with an empty container.
    async fn metadata(&self, rating_key: u64) -> Result<MediaMetadata> {
        let wrapper: MediaContainerWrapper<MetadataContainer> =
            self.fetch(&format!("/library/metadata/{rating_key}")).await?;

        wrapper
            .media_container
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("no metadata for rating key {rating_key}")))
    }
}
