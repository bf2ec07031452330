use crate::{error::AppError, secrets::Credentials, CONFIG};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client as ReqwestClient;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use twilio::{Client as TwilioClient, NewApplication, TwilioError};

/// Registers the TwiML application that Twilio calls back on `/voice`.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Creates a new application and returns its sid.
    async fn create_application(
        &self,
        credentials: &Credentials,
        friendly_name: &str,
        voice_url: &str,
    ) -> Result<String, TwilioError>;

    /// Points an existing application at `voice_url` and returns its sid.
    async fn update_application(
        &self,
        credentials: &Credentials,
        sid: &str,
        voice_url: &str,
    ) -> Result<String, TwilioError>;
}

/// Provisions applications through the Twilio REST API.
pub struct TwilioProvisioner {
    http: ReqwestClient,
}

impl TwilioProvisioner {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = ReqwestClient::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    fn client(&self, credentials: &Credentials) -> TwilioClient {
        TwilioClient::with_http(
            &credentials.account_sid,
            &credentials.auth_token,
            self.http.clone(),
        )
    }
}

#[async_trait]
impl Provisioner for TwilioProvisioner {
    async fn create_application(
        &self,
        credentials: &Credentials,
        friendly_name: &str,
        voice_url: &str,
    ) -> Result<String, TwilioError> {
        let app = self
            .client(credentials)
            .create_application(NewApplication::new(friendly_name, voice_url))
            .await?;
        Ok(app.sid)
    }

    async fn update_application(
        &self,
        credentials: &Credentials,
        sid: &str,
        voice_url: &str,
    ) -> Result<String, TwilioError> {
        let app = self
            .client(credentials)
            .update_application_voice_url(sid, voice_url)
            .await?;
        Ok(app.sid)
    }
}

/// Outcome of one provisioning attempt, shared by every request waiting on it.
type Provisioning = Shared<BoxFuture<'static, Result<String, Arc<AppError>>>>;

enum Slot {
    Ready(String),
    Pending { attempt: u64, provisioning: Provisioning },
}

/// Process-wide cache of provisioned application sids, one per Twilio account.
///
/// The first request for an account starts a provisioning attempt and every
/// request arriving while it runs awaits that same attempt, sharing its result.
/// A failed attempt removes the slot, so only a later request tries again.
pub struct ApplicationCache {
    provisioner: Arc<dyn Provisioner>,
    voice_url: String,
    preconfigured: Option<String>,
    timeout: Duration,
    retries: u32,
    next_attempt: AtomicU64,
    applications: Mutex<HashMap<String, Slot>>,
}

impl ApplicationCache {
    pub fn new(provisioner: Arc<dyn Provisioner>, voice_url: String) -> Self {
        Self {
            provisioner,
            voice_url,
            preconfigured: None,
            timeout: Duration::from_secs(CONFIG.settings.provider_timeout as u64),
            retries: CONFIG.settings.provision_retry as u32,
            next_attempt: AtomicU64::new(0),
            applications: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse an existing application instead of creating one. It is still
    /// updated on first use so that it points at this server.
    pub fn with_preconfigured(mut self, sid: Option<String>) -> Self {
        self.preconfigured = sid;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the application sid for the account, provisioning it on first use.
    pub async fn application_sid(&self, credentials: &Credentials) -> Result<String, AppError> {
        let (attempt, provisioning) = {
            let mut applications = self.applications.lock().await;
            match applications.get(&credentials.account_sid) {
                Some(Slot::Ready(sid)) => return Ok(sid.clone()),
                Some(Slot::Pending {
                    attempt,
                    provisioning,
                }) => (*attempt, provisioning.clone()),
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let provisioning = self.start(credentials.clone());
                    applications.insert(
                        credentials.account_sid.clone(),
                        Slot::Pending {
                            attempt,
                            provisioning: provisioning.clone(),
                        },
                    );
                    (attempt, provisioning)
                }
            }
        };

        let result = provisioning.await;

        // Settle the slot unless a newer attempt already owns it
        let mut applications = self.applications.lock().await;
        let owned = matches!(
            applications.get(&credentials.account_sid),
            Some(Slot::Pending { attempt: current, .. }) if *current == attempt
        );
        if owned {
            match result {
                Ok(ref sid) => {
                    applications.insert(credentials.account_sid.clone(), Slot::Ready(sid.clone()));
                }
                Err(_) => {
                    applications.remove(&credentials.account_sid);
                }
            }
        }

        result.map_err(AppError::Shared)
    }

    fn start(&self, credentials: Credentials) -> Provisioning {
        let job = ProvisionJob {
            provisioner: self.provisioner.clone(),
            credentials,
            voice_url: self.voice_url.clone(),
            preconfigured: self.preconfigured.clone(),
            timeout: self.timeout,
            retries: self.retries,
        };

        async move { job.run().await.map_err(Arc::new) }
            .boxed()
            .shared()
    }
}

/// A single provisioning attempt, owning everything it needs to outlive the
/// request that started it.
struct ProvisionJob {
    provisioner: Arc<dyn Provisioner>,
    credentials: Credentials,
    voice_url: String,
    preconfigured: Option<String>,
    timeout: Duration,
    retries: u32,
}

impl ProvisionJob {
    async fn run(self) -> Result<String, AppError> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.provision_once()).await {
                Err(_) => return Err(AppError::ProviderTimeout(self.timeout)),
                Ok(Ok(sid)) => return Ok(sid),
                Ok(Err(e)) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!("Provisioning attempt {attempt} could not reach Twilio, retrying: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn provision_once(&self) -> Result<String, TwilioError> {
        match self.preconfigured {
            Some(ref sid) => {
                let sid = self
                    .provisioner
                    .update_application(&self.credentials, sid, &self.voice_url)
                    .await?;
                log::info!("Updated existing TwiML app {sid} to call {}", self.voice_url);
                Ok(sid)
            }
            None => {
                let sid = self
                    .provisioner
                    .create_application(
                        &self.credentials,
                        CONFIG.settings.application_name,
                        &self.voice_url,
                    )
                    .await?;
                log::info!("Created new TwiML app {sid} calling {}", self.voice_url);
                Ok(sid)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProvisioner;
    use super::*;
    use std::time::Instant;

    fn credentials(account_sid: &str) -> Credentials {
        Credentials {
            account_sid: account_sid.to_string(),
            auth_token: "secret".to_string(),
        }
    }

    fn cache(provisioner: &Arc<FakeProvisioner>) -> ApplicationCache {
        ApplicationCache::new(
            provisioner.clone(),
            "http://localhost:3000/voice".to_string(),
        )
    }

    #[tokio::test]
    async fn provisions_once_and_reuses_the_sid() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let cache = cache(&provisioner);

        let first = cache.application_sid(&credentials("AC1")).await.unwrap();
        let second = cache.application_sid(&credentials("AC1")).await.unwrap();

        assert_eq!(first, "AP-AC1-1");
        assert_eq!(first, second);
        assert_eq!(provisioner.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_requests_share_one_provisioning_call() {
        let provisioner = Arc::new(FakeProvisioner {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = Arc::new(cache(&provisioner));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.application_sid(&credentials("AC1")).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "AP-AC1-1");
        }
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_share_a_failed_attempt() {
        let provisioner = Arc::new(FakeProvisioner {
            delay: Duration::from_millis(300),
            ..Default::default()
        });
        let cache = Arc::new(cache(&provisioner).with_timeout(Duration::from_millis(100)));
        let started = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.application_sid(&credentials("AC1")).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err.root(), AppError::ProviderTimeout(_)));
        }
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 1);

        // Only a request arriving after the failure starts a new attempt
        let err = cache.application_sid(&credentials("AC1")).await.unwrap_err();
        assert!(matches!(err.root(), AppError::ProviderTimeout(_)));
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_accounts_are_not_kept() {
        let provisioner = Arc::new(FakeProvisioner {
            api_failures: 3.into(),
            ..Default::default()
        });
        let cache = cache(&provisioner);

        for account in ["AC1", "AC2", "AC3"] {
            assert!(cache.application_sid(&credentials(account)).await.is_err());
        }
        assert!(cache.applications.lock().await.is_empty());

        cache.application_sid(&credentials("AC4")).await.unwrap();
        assert_eq!(cache.applications.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn accounts_are_provisioned_separately() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let cache = cache(&provisioner);

        let a = cache.application_sid(&credentials("AC1")).await.unwrap();
        let b = cache.application_sid(&credentials("AC2")).await.unwrap();

        assert_eq!(a, "AP-AC1-1");
        assert_eq!(b, "AP-AC2-2");
    }

    #[tokio::test]
    async fn failed_provisioning_is_retried_by_the_next_request() {
        let provisioner = Arc::new(FakeProvisioner {
            api_failures: 1.into(),
            ..Default::default()
        });
        let cache = cache(&provisioner);

        let err = cache.application_sid(&credentials("AC1")).await.unwrap_err();
        assert!(matches!(err.root(), AppError::Provider(TwilioError::ApiError { .. })));
        assert_eq!(provisioner.calls(), 1);

        let sid = cache.application_sid(&credentials("AC1")).await.unwrap();
        assert_eq!(sid, "AP-AC1-2");
    }

    #[tokio::test]
    async fn unreachable_twilio_is_retried_once() {
        let provisioner = Arc::new(FakeProvisioner {
            connect_failures: 1.into(),
            ..Default::default()
        });
        let cache = cache(&provisioner);

        let sid = cache.application_sid(&credentials("AC1")).await.unwrap();

        assert_eq!(sid, "AP-AC1-2");
        assert_eq!(provisioner.calls(), 2);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let provisioner = Arc::new(FakeProvisioner {
            api_failures: 1.into(),
            ..Default::default()
        });
        let cache = cache(&provisioner);

        assert!(cache.application_sid(&credentials("AC1")).await.is_err());
        assert_eq!(provisioner.calls(), 1);
    }

    #[tokio::test]
    async fn slow_provisioning_times_out() {
        let provisioner = Arc::new(FakeProvisioner {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let cache = cache(&provisioner).with_timeout(Duration::from_millis(50));

        let err = cache.application_sid(&credentials("AC1")).await.unwrap_err();

        assert!(matches!(err.root(), AppError::ProviderTimeout(_)));
    }

    #[tokio::test]
    async fn preconfigured_application_is_updated_not_created() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let cache = cache(&provisioner).with_preconfigured(Some("AP0042".to_string()));

        let sid = cache.application_sid(&credentials("AC1")).await.unwrap();
        cache.application_sid(&credentials("AC1")).await.unwrap();

        assert_eq!(sid, "AP0042");
        assert_eq!(provisioner.updated.load(Ordering::SeqCst), 1);
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 0);
    }
}
