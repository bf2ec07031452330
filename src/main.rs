use anyhow::Context;
use provision::{ApplicationCache, TwilioProvisioner};
use secrets::{CredentialSource, Secrets};
use static_toml::static_toml;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

static_toml! { static CONFIG = include_toml!("Config.toml"); }

mod error;
mod provision;
mod secrets;
mod webcall;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment and logger
    dotenv::dotenv().ok();
    env_logger::init();

    // Load the secrets
    let secrets = Secrets::from_env()?;
    log::debug!("Loaded configuration: {secrets:?}");

    let preconfigured = match secrets.credential_source {
        CredentialSource::Environment(_) => secrets.twilio_app_sid.clone(),
        CredentialSource::Request => {
            log::warn!(
                "Twilio credentials are taken from /token request bodies, \
                 any caller can provision applications on any account"
            );
            if secrets.twilio_app_sid.is_some() {
                log::warn!("Ignoring TWILIO_APP_SID, applications are provisioned per account");
            }
            None
        }
    };

    // Initialize the provisioning cache, applications are created on the first token request
    log::info!("Initializing the Twilio provisioner");
    let timeout = Duration::from_secs(CONFIG.settings.provider_timeout as u64);
    let provisioner = TwilioProvisioner::new(timeout).context("Failed to build the HTTP client")?;
    let applications = ApplicationCache::new(Arc::new(provisioner), secrets.voice_url())
        .with_preconfigured(preconfigured)
        .with_timeout(timeout);

    // Initialize the TCP listener
    let address = format!("{}:{}", CONFIG.settings.bind_host, secrets.port);
    log::info!("Connecting to the server at {address}");
    let tcp = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {address}"))?;

    log::info!("Token endpoint: {}/token", secrets.server_url);
    log::info!("Voice endpoint: {}", secrets.voice_url());
    let router = webcall::app(secrets, Arc::new(applications));

    // Start the webserver
    log::info!("Starting the webserver");
    axum::serve(tcp, router.into_make_service())
        .await
        .context("Failed to start the server")
}
