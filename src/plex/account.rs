//! plex.tv account authentication.
//!
//! Supports both credential forms: an existing auth token (validated with
//! a profile request) or a username/password sign-in. Either way the
//! result is an [`Account`] carrying the token used for all further
//! requests.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use url::form_urlencoded;
use veil::Redact;

use crate::{
    config::{Config, Credential},
    error::{Error, Result},
    http::{self, Client as HttpClient},
    plex::protocol::User,
};

/// Endpoint validating an existing token.
const USER_URL: &str = "https://plex.tv/api/v2/user";

/// Endpoint exchanging a username/password for a token.
const SIGNIN_URL: &str = "https://plex.tv/api/v2/users/signin";

/// An authenticated plex.tv account.
#[derive(Clone, Redact)]
pub struct Account {
    pub username: String,
    pub email: String,
    #[redact]
    token: String,
}

impl Account {
    /// Authenticates against plex.tv with the configured credential.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or plex.tv rejects the
    /// credential. Callers treat every failure here as transient and
    /// retry.
    pub async fn login(http_client: &HttpClient, config: &Config) -> Result<Self> {
        let user = match &config.credential {
            Credential::Token(token) => Self::validate_token(http_client, token).await?,
            Credential::Password(password) => {
                Self::sign_in(http_client, &config.username, password).await?
            }
        };

        Ok(Self {
            username: user.username,
            email: user.email,
            token: user.auth_token,
        })
    }

    async fn validate_token(http_client: &HttpClient, token: &str) -> Result<User> {
        let url = USER_URL.parse::<reqwest::Url>()?;
        let mut request = http_client.get(url, "");
        request
            .headers_mut()
            .try_insert(http::HEADER_TOKEN, HeaderValue::from_str(token)?)?;

        let response = http_client.execute(request).await?;
        let response = response.error_for_status()?;
        response.json::<User>().await.map_err(Into::into)
    }

    async fn sign_in(http_client: &HttpClient, username: &str, password: &str) -> Result<User> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("login", username)
            .append_pair("password", password)
            .finish();

        let url = SIGNIN_URL.parse::<reqwest::Url>()?;
        let mut request = http_client.post(url, body);
        request.headers_mut().try_insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        )?;

        let response = http_client.execute(request).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::unauthenticated("plex.tv rejected the credentials"));
        }
        let response = response.error_for_status()?;
        response.json::<User>().await.map_err(Into::into)
    }

    /// Token used to authenticate against plex.tv and owned servers.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this account owns the server with the given owner name.
    ///
    /// Owner accounts see every user's sessions in the notification feed,
    /// so the bridge has to filter the feed down to the configured user.
    /// Plex reports the owner either by username or by e-mail.
    #[must_use]
    pub fn owns(&self, server_owner: Option<&str>) -> bool {
        server_owner.is_some_and(|owner| owner == self.username || owner == self.email)
    }
}
