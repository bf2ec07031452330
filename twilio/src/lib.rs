mod application;
pub mod twiml;

pub use application::{Application, NewApplication};
use reqwest::{Client as ReqwestClient, Method, StatusCode};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

const API_BASE_URL: &str = "https://api.twilio.com/2010-04-01";

#[derive(Clone)]
pub struct Client {
    account_id: String,
    auth_token: String,
    base_url: String,
    client: ReqwestClient,
}

#[derive(Debug)]
pub enum TwilioError {
    ReqwestError(reqwest::Error),
    ConnectError(reqwest::Error),
    Timeout,
    ApiError { status: StatusCode, message: String },
    ParsingError,
}

impl TwilioError {
    /// Whether the request failed before it could reach Twilio. Only these
    /// failures are safe to repeat for requests that create resources.
    pub fn is_transient(&self) -> bool {
        matches!(self, TwilioError::ConnectError(_))
    }
}

impl From<reqwest::Error> for TwilioError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TwilioError::Timeout
        } else if e.is_connect() {
            TwilioError::ConnectError(e)
        } else {
            TwilioError::ReqwestError(e)
        }
    }
}

impl Display for TwilioError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            TwilioError::ReqwestError(ref e) => e.fmt(f),
            TwilioError::ConnectError(ref e) => write!(f, "Failed to connect to Twilio: {}", e),
            TwilioError::Timeout => f.write_str("Request to Twilio timed out"),
            TwilioError::ApiError {
                ref status,
                ref message,
            } => write!(f, "Twilio responded with {}: {}", status, message),
            TwilioError::ParsingError => f.write_str("Parsing error"),
        }
    }
}

impl Error for TwilioError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            TwilioError::ReqwestError(ref e) | TwilioError::ConnectError(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Error body returned by the Twilio REST API on non-2xx responses.
#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl Client {
    pub fn new(account_id: &str, auth_token: &str) -> Client {
        Client::with_http(account_id, auth_token, ReqwestClient::new())
    }

    /// Builds a client on top of an existing reqwest client, so connection pools
    /// and timeouts can be shared between accounts.
    pub fn with_http(account_id: &str, auth_token: &str, client: ReqwestClient) -> Client {
        Client {
            account_id: account_id.to_string(),
            auth_token: auth_token.to_string(),
            base_url: API_BASE_URL.to_string(),
            client,
        }
    }

    /// Points the client at another API root, e.g. a local mock server.
    pub fn with_base_url(mut self, base_url: &str) -> Client {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn send_request<T>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, TwilioError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = &format!(
            "{}/Accounts/{}/{}.json",
            self.base_url, self.account_id, endpoint
        );

        let response = self
            .client
            .request(method, url)
            .basic_auth(&self.account_id, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {}
            status => {
                let content = response.text().await.unwrap_or_default();
                log::error!("Twilio request to {endpoint} failed with {status}: {content}");

                let message = serde_json::from_str::<ApiErrorBody>(&content)
                    .map(|body| body.message)
                    .unwrap_or(content);
                return Err(TwilioError::ApiError { status, message });
            }
        };

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                TwilioError::Timeout
            } else {
                TwilioError::ParsingError
            }
        })
    }
}
