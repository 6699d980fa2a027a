// HTTP listing source: fetches the current listing set as JSON from a
// configured endpoint. The property-site scraping that produces that JSON
// lives outside this service.

use crate::errors::CheckError;
use crate::handler::ListingSource;
use crate::models::Listing;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct HttpListingSource {
    client: Client,
    url: String,
}

impl HttpListingSource {
    pub fn new(url: impl Into<String>, timeout_seconds: u64) -> Result<Self, CheckError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| {
                CheckError::SourceUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn current_listings(&self) -> Result<Vec<Listing>, CheckError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CheckError::SourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CheckError::SourceUnavailable(format!(
                "listing endpoint returned status {}",
                response.status()
            )));
        }

        let listings: Vec<Listing> = response
            .json()
            .await
            .map_err(|e| CheckError::SourceUnavailable(format!("invalid listing payload: {}", e)))?;

        debug!(count = listings.len(), "Fetched current listings");
        Ok(listings)
    }
}
