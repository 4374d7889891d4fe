//! Schedule service client.
//!
//! One GET per refresh, no retries.  Callers decide what to do with the
//! result; `ScheduleCache::apply` is the only place a fetched document is
//! stored.

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::ScheduleConfig;
use crate::error::FetchError;
use crate::schedule::ScheduleDocument;

pub struct ScheduleFetcher {
    client: Client,
    endpoint: String,
}

impl ScheduleFetcher {
    pub fn new(config: &ScheduleConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("App", HeaderValue::from_str(&config.app_name)?);
        match config.resolved_token() {
            Some(token) => {
                let mut value = HeaderValue::from_str(&token)?;
                value.set_sensitive(true);
                headers.insert("Token", value);
            }
            None => warn!(
                "schedule: no token configured (set {} or schedule.token)",
                crate::config::TOKEN_ENV
            ),
        }
        // Always go to the network.
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn fetch(&self) -> Result<ScheduleDocument, FetchError> {
        debug!("schedule: GET {}", self.endpoint);
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        decode_schedule(&body)
    }
}

/// Decode a schedule service response body.  Entries come out ordered by
/// start time.
pub fn decode_schedule(body: &[u8]) -> Result<ScheduleDocument, FetchError> {
    let mut document: ScheduleDocument = serde_json::from_slice(body)?;
    document.normalize();
    Ok(document)
}
