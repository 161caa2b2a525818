const BASE_DELAY: u64 = 500;
const MAX_RETRIES: u32 = 3;

use crate::notifier::{ReleaseMessage, ReleaseMessageSource};
use crate::source::{RuleRecordSource, SourceError};
use crate::types::{GrayReleaseRule, RuleId, Target};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::{Duration, sleep};
use url::Url;

#[derive(Deserialize)]
struct LatestMessage {
    id: Option<i64>,
}

/// Reads gray release rules and release messages from the admin service.
pub struct AdminServiceClient {
    client: reqwest::Client,
    base_url: Url,
}

impl AdminServiceClient {
    pub fn new(base_url: Url) -> Self {
        AdminServiceClient {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        if !url.path().ends_with('/') {
            let with_slash = format!("{}/", url.path());
            url.set_path(&with_slash);
        }
        Ok(url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let url = self.endpoint(path)?;
        let mut retries = 0;

        loop {
            let response = self.client.get(url.clone()).query(query).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }

            if !RETRIABLE_STATUS_CODES.contains(&status) {
                return Err(SourceError::UnexpectedStatus(status.as_u16()));
            }
            if retries >= MAX_RETRIES {
                return Err(SourceError::RetriesExceeded {
                    attempts: retries + 1,
                    status: status.as_u16(),
                });
            }

            // Backoff between retries
            let retry_millis = BASE_DELAY * 2_u64.pow(retries);
            tracing::warn!(
                %url,
                status = status.as_u16(),
                retry_millis,
                "retrying admin service request"
            );
            sleep(Duration::from_millis(retry_millis)).await;
            retries += 1;
        }
    }
}

#[async_trait]
impl RuleRecordSource for AdminServiceClient {
    async fn find_by_target(&self, target: &Target) -> Result<Vec<GrayReleaseRule>, SourceError> {
        self.get(
            "gray-release-rules/by-target",
            &[
                ("app_id", target.app_id.as_str()),
                ("cluster", target.cluster.as_str()),
                ("namespace", target.namespace.as_str()),
            ],
        )
        .await
    }

    async fn find_page(
        &self,
        after_id: RuleId,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRule>, SourceError> {
        let after_id = after_id.to_string();
        let limit = limit.to_string();
        self.get(
            "gray-release-rules",
            &[("after_id", after_id.as_str()), ("limit", limit.as_str())],
        )
        .await
    }
}

#[async_trait]
impl ReleaseMessageSource for AdminServiceClient {
    async fn find_latest_id(&self) -> Result<Option<i64>, SourceError> {
        let latest: LatestMessage = self.get("release-messages/latest", &[]).await?;
        Ok(latest.id)
    }

    async fn find_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>, SourceError> {
        let after_id = after_id.to_string();
        let limit = limit.to_string();
        self.get(
            "release-messages",
            &[("after_id", after_id.as_str()), ("limit", limit.as_str())],
        )
        .await
    }
}
