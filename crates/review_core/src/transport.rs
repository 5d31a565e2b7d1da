use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{Abstract, AbstractId, Comment, Email},
    error::ApiException,
    protocol::{NewComment, ScoreUpdate},
};
use tracing::debug;
use url::Url;

use crate::ReviewBackend;

/// [`ReviewBackend`] over the review server's JSON endpoints.
#[derive(Clone)]
pub struct HttpReviewBackend {
    http: Client,
    base: Url,
}

impl HttpReviewBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let mut base =
            Url::parse(server_url).with_context(|| format!("invalid server url '{server_url}'"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    fn abstract_endpoint(&self, id: &AbstractId) -> Result<Url> {
        let mut url = self.endpoint("abstracts/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server url cannot carry path segments"))?
            .pop_if_empty()
            .push(id.as_str());
        Ok(url)
    }

    fn comments_endpoint(&self, id: &AbstractId) -> Result<Url> {
        let mut url = self.endpoint("comments/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server url cannot carry path segments"))?
            .pop_if_empty()
            .push(id.as_str());
        Ok(url)
    }
}

/// The backend answers failures with a plain-text body and a 500 status, so
/// the body is carried into the error for the diagnostic log.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiException::from_status(status.as_u16(), body).into())
}

#[async_trait]
impl ReviewBackend for HttpReviewBackend {
    async fn list_abstracts(&self) -> Result<Vec<Abstract>> {
        let response = self
            .http
            .get(self.endpoint("abstracts/")?)
            .send()
            .await
            .map_err(ApiException::transport)?;
        let abstracts: Vec<Abstract> = ensure_success(response)
            .await?
            .json()
            .await
            .context("failed to decode abstract list")?;
        debug!(count = abstracts.len(), "fetched abstracts");
        Ok(abstracts)
    }

    async fn get_abstract(&self, id: &AbstractId) -> Result<Abstract> {
        let response = self
            .http
            .get(self.abstract_endpoint(id)?)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response)
            .await?
            .json()
            .await
            .with_context(|| format!("failed to decode abstract {id}"))
    }

    async fn create_abstract(&self, draft: &Abstract) -> Result<Abstract> {
        let body = Abstract {
            id: None,
            ..draft.clone()
        };
        let response = self
            .http
            .put(self.endpoint("abstracts/")?)
            .json(&body)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response)
            .await?
            .json()
            .await
            .context("failed to decode created abstract")
    }

    async fn update_abstract(&self, record: &Abstract) -> Result<Abstract> {
        let response = self
            .http
            .patch(self.endpoint("abstracts/")?)
            .json(record)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response)
            .await?
            .json()
            .await
            .context("failed to decode updated abstract")
    }

    async fn delete_abstract(&self, id: &AbstractId) -> Result<()> {
        let response = self
            .http
            .delete(self.abstract_endpoint(id)?)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn update_scores(&self, updates: &[ScoreUpdate]) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("updatescores")?)
            .json(updates)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn list_comments(&self, id: &AbstractId) -> Result<Vec<Comment>> {
        let response = self
            .http
            .get(self.comments_endpoint(id)?)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response)
            .await?
            .json()
            .await
            .with_context(|| format!("failed to decode comments for abstract {id}"))
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<()> {
        let response = self
            .http
            .put(self.endpoint("comments/")?)
            .json(comment)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<Email>> {
        let response = self
            .http
            .get(self.endpoint("admins/")?)
            .send()
            .await
            .map_err(ApiException::transport)?;
        ensure_success(response)
            .await?
            .json()
            .await
            .context("failed to decode admin list")
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
