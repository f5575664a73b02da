use crate::application::ports::ReachabilityProbe;
use crate::shared::config::ConnectivityConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use reqwest::Client;

/// Confirms reachability with a `HEAD` request against a small static resource.
pub struct HttpReachabilityProbe {
    client: Client,
    url: String,
}

impl HttpReachabilityProbe {
    pub fn new(config: &ConnectivityConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|err| AppError::ConfigurationError(format!("probe client: {err}")))?;
        Ok(Self {
            client,
            url: config.probe_url.clone(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> Result<(), AppError> {
        let response = self
            .client
            .head(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(AppError::Network(format!("probe returned {status}")))
        }
    }
}
