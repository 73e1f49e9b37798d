mod client;
mod error;
mod graphql;

pub use client::{Credentials, KrakenClient};
pub use error::KrakenError;

use infrastructure::HttpClientConfig;
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.oejp-kraken.energy/v1/graphql/";

#[derive(Deserialize, Clone)]
pub struct Octopus {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_scan_interval_minutes")]
    pub scan_interval_minutes: u64,
    #[serde(default)]
    pub http: HttpClientConfig,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

fn default_scan_interval_minutes() -> u64 {
    30
}

impl std::fmt::Debug for Octopus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Octopus")
            .field("credentials", &self.credentials())
            .field("account_number", &self.account_number)
            .field("api_url", &self.api_url)
            .field("scan_interval_minutes", &self.scan_interval_minutes)
            .finish()
    }
}

impl Octopus {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.email, &self.password)
    }

    pub fn new_client(&self) -> anyhow::Result<KrakenClient> {
        let http_client = self
            .http
            .clone()
            .with_user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .new_tracing_client()?;

        let client = KrakenClient::new(http_client, &self.api_url, self.credentials());

        Ok(match &self.account_number {
            Some(number) => client.with_account_number(number),
            None => client,
        })
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_minutes.max(1) * 60)
    }
}

impl crate::coordinator::ReadingSource for KrakenClient {
    async fn fetch_readings(
        &mut self,
        from: crate::core::time::DateTime,
        to: crate::core::time::DateTime,
    ) -> Result<Vec<crate::consumption::RawReading>, KrakenError> {
        self.half_hourly_readings(Some(from), Some(to)).await
    }
}
