use crate::{Credentials, Fetcher, RepoError};
use base64::Engine as _;
use std::io::Read;

/// HTTP fetcher for repository indices, chart archives and provenance files.
///
/// `file://` URLs are read straight from the local filesystem, which lets a
/// repository be served from a directory without running a web server.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { agent }
    }

    fn basic_auth(credentials: &Credentials) -> String {
        let raw = format!("{}:{}", credentials.username, credentials.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    fn read_file(path: &str) -> Result<Vec<u8>, RepoError> {
        std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepoError::NotFound(path.to_owned())
            } else {
                RepoError::DownloadFailed(format!("{path}: {e}"))
            }
        })
    }

    fn do_get(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, RepoError> {
        let mut req = self.agent.get(url);
        if let Some(creds) = credentials {
            req = req.header("Authorization", &Self::basic_auth(creds));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RepoError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RepoError::DownloadFailed(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RepoError::DownloadFailed(format!("{url}: {e}")));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RepoError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RepoError::DownloadFailed(format!("HTTP {code} for {url}")));
        }

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RepoError::DownloadFailed(format!("{url}: {e}")))?;
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, RepoError> {
        if let Some(path) = url.strip_prefix("file://") {
            tracing::debug!("READ {path}");
            return Self::read_file(path);
        }
        tracing::debug!("GET {url}");
        self.do_get(url, credentials)
    }
}
