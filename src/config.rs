//! Configuration for the presence bridge.
//!
//! Settings are read from a TOML file (`settings.toml` by default) that
//! holds the Plex account name, exactly one credential (token or password)
//! and optionally the Plex server name and a Discord application id:
//!
//! ```toml
//! username = "alice"
//! token = "xxxxxxxxxxxxxxxxxxxx"
//! server = "Living Room"
//! ```
//!
//! Keep this file secure: the token grants full access to the Plex account.
//!
//! Credential validation happens here, before any connection attempt. A
//! file with neither `token` nor `password` is a fatal configuration error;
//! when both are present the token takes priority.

use std::fs;

use serde::Deserialize;
use uuid::Uuid;
use veil::Redact;

use crate::error::{Error, Result};

/// Discord application id registered for the bridge.
const DEFAULT_CLIENT_ID: i64 = 741_382_142_730_305_587;

/// Plex credential, either a plex.tv auth token or an account password.
///
/// The token variant is preferred: it skips the password sign-in round
/// trip and keeps the password out of the process entirely.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Redact)]
pub enum Credential {
    /// plex.tv authentication token
    Token(#[redact] String),
    /// Plex account password
    Password(#[redact] String),
}

/// Raw shape of the settings file.
#[derive(Deserialize, Redact)]
struct Settings {
    /// Plex server name as shown on plex.tv; optional when the account
    /// has access to exactly one server.
    server: Option<String>,
    username: String,
    #[redact]
    password: Option<String>,
    #[redact]
    token: Option<String>,
    client_id: Option<i64>,
}

/// Validated runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    /// Name of the Plex server to watch; `None` selects the only server
    /// the account has access to.
    pub server: Option<String>,

    /// Plex account name; also the username whose sessions are mirrored.
    pub username: String,

    pub credential: Credential,

    /// Discord application id used for the IPC handshake.
    pub client_id: i64,

    /// Stable identifier sent as `X-Plex-Client-Identifier`.
    pub device_id: Uuid,

    pub user_agent: String,
}

impl Config {
    /// Loads and validates the settings file.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if the file supplies neither a token
    /// nor a password, and `InvalidArgument` if it cannot be parsed.
    pub fn from_file(path: &str) -> Result<Self> {
        // Prevent out-of-memory conditions: the settings file is small.
        let attributes = fs::metadata(path)?;
        if attributes.len() > 16_384 {
            return Err(Error::invalid_argument(format!("{path} is too large")));
        }

        let settings: Settings = toml::from_str(&fs::read_to_string(path)?)?;
        trace!("settings: {settings:?}");

        // Token takes priority when both credentials are present.
        let credential = match (settings.token, settings.password) {
            (Some(token), _) => Credential::Token(token),
            (None, Some(password)) => Credential::Password(password),
            (None, None) => {
                return Err(Error::failed_precondition(format!(
                    "{path} contains neither a token nor a password"
                )));
            }
        };

        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let device_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"plex.tv");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("could not get machine id, using random device id: {e}");
                Uuid::new_v4()
            }
        };
        trace!("device uuid: {device_id}");

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            server: settings.server,
            username: settings.username,
            credential,
            client_id: settings.client_id.unwrap_or(DEFAULT_CLIENT_ID),
            device_id,
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write settings");
        file
    }

    #[test]
    fn token_only_is_accepted() {
        let file = write_settings("username = \"alice\"\ntoken = \"t0ken\"\n");
        let config = Config::from_file(file.path().to_str().unwrap()).expect("config");
        assert_eq!(config.username, "alice");
        assert_eq!(config.credential, Credential::Token("t0ken".to_owned()));
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn password_only_is_accepted() {
        let file = write_settings("username = \"alice\"\npassword = \"hunter2\"\n");
        let config = Config::from_file(file.path().to_str().unwrap()).expect("config");
        assert_eq!(
            config.credential,
            Credential::Password("hunter2".to_owned())
        );
    }

    #[test]
    fn token_wins_over_password() {
        let file = write_settings(
            "username = \"alice\"\ntoken = \"t0ken\"\npassword = \"hunter2\"\n",
        );
        let config = Config::from_file(file.path().to_str().unwrap()).expect("config");
        assert_eq!(config.credential, Credential::Token("t0ken".to_owned()));
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let file = write_settings("username = \"alice\"\n");
        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Config::from_file("does/not/exist.toml").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let credential = Credential::Token("super-secret".to_owned());
        assert!(!format!("{credential:?}").contains("super-secret"));
    }
}
