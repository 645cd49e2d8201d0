use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::PatcherConfig;
use crate::errors::{PatcherError, Result};

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn from_config(config: &PatcherConfig) -> Result<Self> {
        Ok(Self::new(config.build_http_client()?, config.api_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut request = self.client.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PatcherError::NotFound(url));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PatcherError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        Ok(response.json::<T>().await?)
    }
}
