//! HTTP client for the appliance REST API
//!
//! Object listings come back as arrays of object paths; details are fetched
//! through `POST /batch` in groups of [`BATCH_SIZE`].

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::dvr::api::{Airing, ApplianceInfo, DiscoveryResponse, Drive};
use crate::dvr::error::{Result, SyncError};
use crate::dvr::models::ShowType;

/// Port the appliance API listens on
pub const APPLIANCE_PORT: u16 = 8885;

/// Largest number of paths the appliance accepts per batch call
pub const BATCH_SIZE: usize = 50;

/// Delay before the single retry of a failed request
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ApplianceClient {
    http: reqwest::Client,
    base_url: String,
    retry_delay: Duration,
}

impl ApplianceClient {
    /// Client for the appliance at `private_ip`
    pub fn new(private_ip: &str) -> Self {
        Self::with_base_url(format!("http://{}:{}", private_ip, APPLIANCE_PORT))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying once after `retry_delay` if it never reached the appliance
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        match build().send().await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    "Error connecting to {}: {}. Waiting {}s to retry",
                    self.base_url,
                    e,
                    self.retry_delay.as_secs()
                );
                tokio::time::sleep(self.retry_delay).await;
                Ok(build().send().await?)
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.send(|| self.http.get(&url)).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// List the object paths under `path`
    pub async fn get_paths(&self, path: &str) -> Result<Vec<String>> {
        self.get_json(path).await
    }

    /// Fetch details for `paths`, merging the per-batch responses into one map
    pub async fn batch<T: DeserializeOwned>(&self, paths: &[String]) -> Result<BTreeMap<String, T>> {
        let url = self.url("/batch");
        let mut details = BTreeMap::new();

        for chunk in paths.chunks(BATCH_SIZE) {
            debug!("POST {} ({} paths)", url, chunk.len());
            let response = self.send(|| self.http.post(&url).json(chunk)).await?;
            let body = response.text().await?;
            let part: BTreeMap<String, T> = serde_json::from_str(&body)?;
            details.extend(part);
        }

        Ok(details)
    }

    /// List `path` and fetch details for everything it returns
    ///
    /// An empty listing is `NoResults(what)`; an empty batch answer is `NoDetails(what)`.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
    ) -> Result<BTreeMap<String, T>> {
        let paths = self.get_paths(path).await?;
        if paths.is_empty() {
            return Err(SyncError::NoResults(what));
        }

        info!("Getting details for {} {}", paths.len(), what);
        let details = self.batch(&paths).await?;
        if details.is_empty() {
            return Err(SyncError::NoDetails(what));
        }
        Ok(details)
    }

    pub async fn get_drives(&self) -> Result<Vec<Drive>> {
        self.get_json("/server/harddrives").await
    }

    /// PATCH an airing to `{"scheduled": false}` and return the appliance's view of it
    ///
    /// A missing airing comes back as an error envelope, not as `Err`.
    pub async fn unschedule(&self, show_type: ShowType, airing_id: i64) -> Result<Airing> {
        let url = self.url(&format!("/guide/{}/{}", show_type.airing_subpath(), airing_id));
        debug!("PATCH {}", url);
        let body = serde_json::json!({ "scheduled": false });
        let response = self.send(|| self.http.patch(&url).json(&body)).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Ask the discovery service which appliances share this network
pub async fn discover(url: &str) -> Result<Vec<ApplianceInfo>> {
    info!("Discovering appliances via {}", url);
    let body = reqwest::Client::new().get(url).send().await?.text().await?;
    let response: DiscoveryResponse = serde_json::from_str(&body)?;
    info!("Discovered {} appliance(s)", response.cpes.len());
    Ok(response.cpes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::dvr::api::Channel;

    #[tokio::test]
    async fn test_batch_splits_into_groups_of_fifty() {
        let server = MockServer::start().await;
        let paths: Vec<String> = (1..=120).map(|i| format!("/guide/channels/{}", i)).collect();

        for chunk in paths.chunks(BATCH_SIZE) {
            let body: serde_json::Map<String, serde_json::Value> = chunk
                .iter()
                .map(|p| {
                    let id: i64 = p.rsplit('/').next().unwrap().parse().unwrap();
                    (p.clone(), json!({"object_id": id, "channel": {"call_sign": "KQED"}}))
                })
                .collect();
            Mock::given(method("POST"))
                .and(path("/batch"))
                .and(body_json(chunk))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = ApplianceClient::with_base_url(server.uri());
        let details: BTreeMap<String, Channel> = client.batch(&paths).await.unwrap();
        assert_eq!(details.len(), 120);
        assert_eq!(details["/guide/channels/120"].object_id, 120);
    }

    #[tokio::test]
    async fn test_fetch_all_reports_empty_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide/airings"))
            .and(query_param("state", "scheduled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = ApplianceClient::with_base_url(server.uri());
        let err = client
            .fetch_all::<Airing>("/guide/airings?state=scheduled", "airings")
            .await
            .unwrap_err();
        assert!(err.is_empty_result());
        assert_eq!(err.to_string(), "no airings returned");
    }

    #[tokio::test]
    async fn test_unschedule_not_found_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guide/series/episodes/42"))
            .and(body_json(json!({"scheduled": false})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "object_not_found", "details": "42", "description": "no such airing"}
            })))
            .mount(&server)
            .await;

        let client = ApplianceClient::with_base_url(server.uri());
        let airing = client.unschedule(ShowType::Series, 42).await.unwrap();
        assert!(airing.is_not_found());
    }

    #[tokio::test]
    async fn test_connection_failure_retries_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // Accept every connection and close it before answering
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let client = ApplianceClient::with_base_url(format!("http://{}", addr))
            .with_retry_delay(Duration::from_millis(10));
        let err = client.get_paths("/guide/channels").await.unwrap_err();
        assert!(matches!(err, SyncError::Http(_)));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_discover() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assocserver/getipinfo/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cpes": [{"serverid": "SID_123", "name": "Den", "private_ip": "192.168.1.20"}]
            })))
            .mount(&server)
            .await;

        let found = discover(&format!("{}/assocserver/getipinfo/", server.uri()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].server_id, "SID_123");
        assert_eq!(found[0].private_ip, "192.168.1.20");
    }
}
