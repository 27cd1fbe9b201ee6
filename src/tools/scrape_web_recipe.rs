use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{required_str, ToolArguments, ToolError, ToolFunction};
use crate::scraping::fetch_and_scrape;

pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(20);

/// Scrapes a single recipe page on demand. Fetch and parse failures are
/// returned to the model as an `{"error", "attempted_url"}` payload.
pub struct ScrapeWebRecipe {
    client: Client,
    timeout: Duration,
}

impl ScrapeWebRecipe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: SCRAPE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ToolFunction for ScrapeWebRecipe {
    async fn call(&self, arguments: &ToolArguments) -> Result<Value, ToolError> {
        let link = required_str(arguments, "link")?;
        Ok(fetch_and_scrape(&self.client, link, Some(self.timeout)).await)
    }
}
