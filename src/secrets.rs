use crate::CONFIG;
use anyhow::{bail, Context, Result};
use std::env::var;
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"***REDACTED***")
            .finish()
    }
}

/// Where the Twilio credentials used for provisioning and signing come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// The server's own account, read from the environment at startup.
    Environment(Credentials),
    /// Each `/token` request carries the account credentials in its body.
    Request,
}

#[derive(Debug, Clone)]
pub struct Secrets {
    pub port: u16,
    pub server_url: String,
    pub credential_source: CredentialSource,
    pub twilio_app_sid: Option<String>,
    pub twilio_phone_number: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        let port = match optional("PORT") {
            Some(port) => port.parse().context("PORT must be a valid port number")?,
            None => CONFIG.settings.default_port as u16,
        };

        let server_url = optional("SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let credential_source = match optional("CREDENTIAL_SOURCE").as_deref() {
            None | Some("environment") => CredentialSource::Environment(Credentials {
                account_sid: var("TWILIO_ACCOUNT_SID")
                    .context("TWILIO_ACCOUNT_SID must be set")?,
                auth_token: var("TWILIO_AUTH_TOKEN").context("TWILIO_AUTH_TOKEN must be set")?,
            }),
            Some("request") => CredentialSource::Request,
            Some(other) => bail!(
                "CREDENTIAL_SOURCE must be either `environment` or `request`, got `{other}`"
            ),
        };

        Ok(Self {
            port,
            server_url,
            credential_source,
            twilio_app_sid: optional("TWILIO_APP_SID"),
            twilio_phone_number: optional("TWILIO_PHONE_NUMBER"),
        })
    }

    /// The url Twilio calls back for call routing instructions.
    pub fn voice_url(&self) -> String {
        format!("{}/voice", self.server_url)
    }
}

/// Reads an environment variable, treating an empty value as unset.
fn optional(key: &str) -> Option<String> {
    var(key).ok().filter(|value| !value.trim().is_empty())
}
