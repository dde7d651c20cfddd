//! HTTP client with rate limiting for the Plex APIs.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting so metadata and session polls cannot hammer
//!   plex.tv or the media server
//! * The standard `X-Plex-*` identification headers on every request
//! * Consistent timeouts and a JSON `Accept` header
//!
//! Plex answers in XML unless `Accept: application/json` is set, so the
//! header is part of the client defaults rather than per request.

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// Plex identification headers sent with every request.
const HEADER_PRODUCT: &str = "X-Plex-Product";
const HEADER_VERSION: &str = "X-Plex-Version";
const HEADER_CLIENT_IDENTIFIER: &str = "X-Plex-Client-Identifier";

/// Header carrying the authentication token, set per request once a token
/// is known.
pub const HEADER_TOKEN: &str = "X-Plex-Token";

/// HTTP client with built-in rate limiting and Plex identification.
pub struct Client {
    /// Unlimited request client for special cases.
    ///
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter applied by [`execute`](Self::execute).
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which [`RATE_LIMIT_CALLS_PER_INTERVAL`]
    /// requests are allowed.
    ///
    /// [`RATE_LIMIT_CALLS_PER_INTERVAL`]: Self::RATE_LIMIT_CALLS_PER_INTERVAL
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum API calls per interval.
    ///
    /// Plex publishes no quota; this bounds worst-case traffic when the
    /// notification feed misbehaves. Requests beyond the limit are
    /// delayed, not dropped.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 25;

    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead for subsequent requests.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client carrying the Plex identification headers.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails or a header value is
    /// invalid.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(HEADER_PRODUCT, HeaderValue::from_str(&config.app_name)?);
        headers.insert(HEADER_VERSION, HeaderValue::from_str(&config.app_version)?);
        headers.insert(
            HEADER_CLIENT_IDENTIFIER,
            HeaderValue::from_str(&config.device_id.to_string())?,
        );

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a POST request.
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    /// Builds a GET request.
    pub fn get<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::GET, url, body)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if request execution fails or a network error
    /// occurs.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
