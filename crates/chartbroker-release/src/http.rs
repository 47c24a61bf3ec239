use crate::{
    ChartRef, InstallRequest, Release, ReleaseError, ReleaseManager, UpgradeRequest, Values,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Where the remote release manager lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerEndpoint {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ManagerEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }
}

/// Body of install (`POST /releases`) and upgrade (`PUT /releases/<name>`) calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSubmission {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub chart: ChartRef,
    /// Base64 of the chart archive bytes.
    pub archive: String,
    #[serde(default)]
    pub values: Values,
    pub timeout_secs: u64,
}

impl ChartSubmission {
    pub fn decode_archive(&self) -> Result<Vec<u8>, ReleaseError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.archive)
            .map_err(|e| ReleaseError::Serialization(format!("invalid archive encoding: {e}")))
    }
}

/// Release manager reached over HTTP/JSON.
///
/// - `POST   /releases`                               install
/// - `PUT    /releases/<name>`                        upgrade
/// - `DELETE /releases/<name>?purge=<bool>&timeout=<s>` delete
/// - `GET    /releases/<name>/status`                 latest revision
/// - `GET    /releases/<name>/history?max=<n>`        revisions, newest first
///
/// A 404 on any release route is reported as [`ReleaseError::NotFound`].
pub struct HttpReleaseManager {
    endpoint: ManagerEndpoint,
    agent: ureq::Agent,
}

impl HttpReleaseManager {
    pub fn new(endpoint: ManagerEndpoint) -> Self {
        // Leave headroom over the server-side operation timeout.
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(crate::DEFAULT_TIMEOUT + Duration::from_secs(30)))
            .build();
        Self {
            endpoint,
            agent: config.into(),
        }
    }

    fn release_url(&self, name: &str) -> String {
        format!("{}/releases/{name}", self.endpoint.url)
    }

    fn submission(
        name: &str,
        namespace: &str,
        chart_path: &Path,
        values: &Values,
        timeout: Duration,
    ) -> Result<Vec<u8>, ReleaseError> {
        if chart_path.is_dir() {
            return Err(ReleaseError::Chart(format!(
                "{} is a directory; the remote release manager needs a chart archive",
                chart_path.display()
            )));
        }
        let data = std::fs::read(chart_path)
            .map_err(|e| ReleaseError::Chart(format!("{}: {e}", chart_path.display())))?;
        let body = ChartSubmission {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            chart: ChartRef::from_path(chart_path),
            archive: base64::engine::general_purpose::STANDARD.encode(data),
            values: values.clone(),
            timeout_secs: timeout.as_secs(),
        };
        serde_json::to_vec(&body).map_err(|e| ReleaseError::Serialization(e.to_string()))
    }

    fn map_err(name: &str, url: &str, err: ureq::Error) -> ReleaseError {
        match err {
            ureq::Error::StatusCode(404) => ReleaseError::NotFound(name.to_owned()),
            ureq::Error::StatusCode(409) => ReleaseError::AlreadyExists(name.to_owned()),
            ureq::Error::StatusCode(code) => {
                ReleaseError::Upstream(format!("HTTP {code} for {url}"))
            }
            e => ReleaseError::Upstream(format!("{url}: {e}")),
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        resp: ureq::http::Response<ureq::Body>,
    ) -> Result<T, ReleaseError> {
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| ReleaseError::Upstream(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| ReleaseError::Serialization(format!("invalid response: {e}")))
    }

    fn do_get<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        url: &str,
    ) -> Result<T, ReleaseError> {
        let mut req = self.agent.get(url);
        if let Some(ref token) = self.endpoint.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req.call().map_err(|e| Self::map_err(name, url, e))?;
        Self::read_json(resp)
    }

    fn do_send(
        &self,
        method: &str,
        name: &str,
        url: &str,
        body: &[u8],
    ) -> Result<Release, ReleaseError> {
        let mut req = match method {
            "PUT" => self.agent.put(url),
            _ => self.agent.post(url),
        }
        .header("Content-Type", "application/json");
        if let Some(ref token) = self.endpoint.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req.send(body).map_err(|e| Self::map_err(name, url, e))?;
        Self::read_json(resp)
    }
}

impl ReleaseManager for HttpReleaseManager {
    fn name(&self) -> &'static str {
        "http"
    }

    fn install(&self, req: &InstallRequest) -> Result<Release, ReleaseError> {
        let url = format!("{}/releases", self.endpoint.url);
        tracing::debug!("POST {url} ({})", req.release_name);
        let body = Self::submission(
            &req.release_name,
            &req.namespace,
            &req.chart_path,
            &req.values,
            req.timeout,
        )?;
        self.do_send("POST", &req.release_name, &url, &body)
    }

    fn delete(&self, name: &str, purge: bool, timeout: Duration) -> Result<Release, ReleaseError> {
        let url = format!(
            "{}?purge={purge}&timeout={}",
            self.release_url(name),
            timeout.as_secs()
        );
        tracing::debug!("DELETE {url}");
        let mut req = self.agent.delete(&url);
        if let Some(ref token) = self.endpoint.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req.call().map_err(|e| Self::map_err(name, &url, e))?;
        Self::read_json(resp)
    }

    fn upgrade(&self, req: &UpgradeRequest) -> Result<Release, ReleaseError> {
        let url = self.release_url(&req.release_name);
        tracing::debug!("PUT {url}");
        let body = Self::submission(
            &req.release_name,
            "",
            &req.chart_path,
            &req.values,
            req.timeout,
        )?;
        self.do_send("PUT", &req.release_name, &url, &body)
    }

    fn status(&self, name: &str) -> Result<Release, ReleaseError> {
        let url = format!("{}/status", self.release_url(name));
        tracing::debug!("GET {url}");
        self.do_get(name, &url)
    }

    fn history(&self, name: &str, max: usize) -> Result<Vec<Release>, ReleaseError> {
        let url = format!("{}/history?max={max}", self.release_url(name));
        tracing::debug!("GET {url}");
        self.do_get(name, &url)
    }
}
