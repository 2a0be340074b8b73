use std::sync::Arc;

use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::aggregate::{PipelineRecord, StepRecord};
use crate::auth::CredentialStore;
use crate::error::{PipewatchError, Result};

use super::types::{PipelineDetail, PipelinePage, StepsPage};

/// Bitbucket Pipelines REST client.
///
/// Speaks the two endpoints the refresh cycle needs: the pipeline listing
/// (for the total count) and the per-pipeline detail/steps resources.
/// Credentials come from the shared [`CredentialStore`] at request time, so
/// a re-entered token takes effect without rebuilding the client.
pub struct BitbucketClient {
    client: Client,
    base_url: String,
    workspace: String,
    repository: String,
    credentials: Arc<CredentialStore>,
    window: usize,
}

impl BitbucketClient {
    /// Creates a client for one repository.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API base URL (e.g. <https://api.bitbucket.org/2.0>)
    /// * `workspace` - Bitbucket workspace slug
    /// * `repository` - Repository slug
    /// * `credentials` - Shared credential holder
    /// * `window` - How many recent pipelines one refresh cycle covers
    ///
    /// # Errors
    ///
    /// Returns a config error when the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        workspace: String,
        repository: String,
        credentials: Arc<CredentialStore>,
        window: usize,
    ) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| PipewatchError::Config(format!("Invalid base URL: {e}")))?;

        let client = Client::builder()
            .user_agent("pipewatch/0.3.0")
            .build()
            .map_err(|e| PipewatchError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace,
            repository,
            credentials,
            window,
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repositories/{}/{}/{tail}",
            self.base_url, self.workspace, self.repository
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        debug!("GET {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = self.credentials.get() {
            request = request.header(AUTHORIZATION, format!("Basic {}", token.as_str()));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        // 400/403 is what the API answers to bad or expired credentials.
        if matches!(status, 400 | 401 | 403) {
            return Err(PipewatchError::Auth { status });
        }

        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(PipewatchError::Transport(format!("status {status}: {body}")));
        }

        Ok(response.json().await?)
    }

    /// Lists the numbers of the most recent pipelines, newest first.
    ///
    /// Pipeline numbers increase monotonically, so the listing endpoint is
    /// only asked for the total count; the window is then addressed
    /// directly as `most_recent` down to `most_recent - window + 1`,
    /// clamped to the available history.
    pub async fn list_recent_pipelines(&self) -> Result<Vec<u64>> {
        let page: PipelinePage = self.get_json(self.repo_url("pipelines/")).await?;

        let most_recent = page.size;
        let count = u64::try_from(self.window).unwrap_or(u64::MAX).min(most_recent);

        Ok((0..count).map(|offset| most_recent - offset).collect())
    }

    /// Fetches one pipeline's record (number and source branch).
    pub async fn fetch_pipeline(&self, pipeline_number: u64) -> Result<PipelineRecord> {
        let detail: PipelineDetail = self
            .get_json(self.repo_url(&format!("pipelines/{pipeline_number}")))
            .await?;

        Ok(detail.into())
    }

    /// Fetches the steps of one pipeline.
    pub async fn fetch_pipeline_steps(&self, pipeline_number: u64) -> Result<Vec<StepRecord>> {
        let page: StepsPage = self
            .get_json(self.repo_url(&format!("pipelines/{pipeline_number}/steps/")))
            .await?;

        Ok(page.values.into_iter().map(Into::into).collect())
    }

    /// Fetches one pipeline's record and steps concurrently.
    pub async fn fetch_pipeline_with_steps(
        &self,
        pipeline_number: u64,
    ) -> Result<(PipelineRecord, Vec<StepRecord>)> {
        let (pipeline, steps) = tokio::join!(
            self.fetch_pipeline(pipeline_number),
            self.fetch_pipeline_steps(pipeline_number),
        );

        Ok((pipeline?, steps?))
    }
}
