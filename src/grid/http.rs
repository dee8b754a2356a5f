use std::env;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{ExtraFeatures, GridFeatureSource};
use crate::config::FeaturesConfig;
use crate::error::{Error, ErrorContext};
use crate::Result;

const EXTRA_FEATURES_PATH: &str = "get_extra_features";

/// Longest remote error body kept in [`Error::Remote`].
const MAX_ERROR_BODY: usize = 512;

/// Asks a grid service for its extra features over HTTP.
///
/// Expects `GET <base>/get_extra_features` to answer with a flat JSON object.
pub struct HttpGridFeatureSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpGridFeatureSource {
    pub fn new(base_uri: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_uri).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid grid service URI '{}'", base_uri),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("grid_fetch"),
            )
        })?;
        // Treat the base as a directory so `join` appends rather than replaces.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base.join(EXTRA_FEATURES_PATH).map_err(|e| {
            Error::configuration_with_context(
                "cannot build extra features URL",
                ErrorContext::new()
                    .with_field_path(base_uri)
                    .with_details(e.to_string())
                    .with_source("grid_fetch"),
            )
        })?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Ok(proxy_url) = env::var("SIM_FEATURES_PROXY_URL") {
            if let Ok(proxy) = reqwest::Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder.build()?;

        Ok(Self { client, url })
    }

    /// Source for the grid named in `config`, if any.
    pub fn from_config(config: &FeaturesConfig) -> Result<Option<Self>> {
        config
            .grid_service_uri
            .as_deref()
            .map(|uri| Self::new(uri, Duration::from_secs(config.fetch_timeout_secs)))
            .transpose()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl GridFeatureSource for HttpGridFeatureSource {
    async fn extra_features(&self) -> Result<ExtraFeatures> {
        let response = self
            .client
            .get(self.url.clone())
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(Error::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<ExtraFeatures>().await?)
    }
}
