//! Transport over the server HTTP API (`reqwest`, JSON bodies)

use crate::client::transport::NomadTransport;
use crate::common::{Error, Result};
use crate::protocol::{AcceptRejectResponse, ChangeRecord, DiscoverResponse, MutativeMessage, NomadChange};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Endpoints are base URLs such as `http://10.0.0.1:9410`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}/nomad/{}", endpoint.trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{} returned {}: {}", endpoint, status, body)));
        }
        Ok(response.json().await?)
    }

    async fn post<B: Serialize>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> Result<AcceptRejectResponse> {
        let response = self
            .client
            .post(Self::url(endpoint, path))
            .json(body)
            .send()
            .await?;
        Self::read(endpoint, response).await
    }
}

impl<C: NomadChange> NomadTransport<C> for HttpTransport {
    async fn discover(&self, endpoint: &str) -> Result<DiscoverResponse<C>> {
        let response = self
            .client
            .get(Self::url(endpoint, "discover"))
            .send()
            .await?;
        Self::read(endpoint, response).await
    }

    async fn mutate(
        &self,
        endpoint: &str,
        message: MutativeMessage<C>,
    ) -> Result<AcceptRejectResponse> {
        let path = message.kind().as_str();
        match &message {
            MutativeMessage::Prepare(m) => self.post(endpoint, path, m).await,
            MutativeMessage::Commit(m) => self.post(endpoint, path, m).await,
            MutativeMessage::Rollback(m) => self.post(endpoint, path, m).await,
            MutativeMessage::Takeover(m) => self.post(endpoint, path, m).await,
        }
    }

    async fn changes_since(&self, endpoint: &str, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        let response = self
            .client
            .get(Self::url(endpoint, "changes"))
            .query(&[("since", version)])
            .send()
            .await?;
        Self::read(endpoint, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfigChange;

    #[test]
    fn test_url_building() {
        assert_eq!(
            HttpTransport::url("http://10.0.0.1:9410/", "discover"),
            "http://10.0.0.1:9410/nomad/discover"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is not listening in test environments
        let err = NomadTransport::<ConfigChange>::discover(&transport, "http://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(err.is_transport_failure(), "got {:?}", err);
    }
}
