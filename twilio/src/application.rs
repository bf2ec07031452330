use crate::{Client, TwilioError};
use reqwest::Method;
use serde::Deserialize;

/// Parameters for registering a new TwiML application.
pub struct NewApplication<'a> {
    pub friendly_name: &'a str,
    pub voice_url: &'a str,
}

impl<'a> NewApplication<'a> {
    pub fn new(friendly_name: &'a str, voice_url: &'a str) -> NewApplication<'a> {
        NewApplication {
            friendly_name,
            voice_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Application {
    pub sid: String,
    pub friendly_name: Option<String>,
    pub voice_url: Option<String>,
    pub voice_method: Option<String>,
}

impl Client {
    pub async fn create_application(
        &self,
        app: NewApplication<'_>,
    ) -> Result<Application, TwilioError> {
        let opts = [
            ("FriendlyName", app.friendly_name),
            ("VoiceUrl", app.voice_url),
            ("VoiceMethod", "POST"),
        ];
        self.send_request(Method::POST, "Applications", &opts).await
    }

    /// Points an existing application at a new voice callback url.
    pub async fn update_application_voice_url(
        &self,
        sid: &str,
        voice_url: &str,
    ) -> Result<Application, TwilioError> {
        let opts = [("VoiceUrl", voice_url)];
        self.send_request(Method::POST, &format!("Applications/{sid}"), &opts)
            .await
    }
}
