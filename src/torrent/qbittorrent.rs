//! qBittorrent Web API v2 client.

use super::{TorrentEngine, TorrentStatus};
use crate::config::{HttpConfig, TorrentEngineConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Torrent entry from `/api/v2/torrents/info`
#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    progress: f64,
    #[serde(default)]
    content_path: Option<String>,
    #[serde(default)]
    save_path: Option<String>,
}

impl From<TorrentInfo> for TorrentStatus {
    fn from(info: TorrentInfo) -> Self {
        // content_path is missing on engines older than 4.3.2
        let content_path = match info.content_path.filter(|p| !p.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(info.save_path.unwrap_or_default()).join(&info.name),
        };
        TorrentStatus {
            hash: info.hash.to_ascii_lowercase(),
            progress: info.progress,
            content_path,
        }
    }
}

/// qBittorrent client authenticating with the Web UI session cookie
pub struct QbittorrentClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    save_path: Option<PathBuf>,
    logged_in: AtomicBool,
}

impl QbittorrentClient {
    /// Create a client; the first request logs in
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &TorrentEngineConfig, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: http.build_service_client(true)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            save_path: config.save_path.clone(),
            logged_in: AtomicBool::new(false),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2{}", self.base_url, endpoint)
    }

    /// POST /api/v2/auth/login
    async fn login(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(Error::TorrentEngine(format!(
                "qBittorrent login rejected (HTTP {}): {}",
                status.as_u16(),
                body.trim()
            )));
        }

        self.logged_in.store(true, Ordering::SeqCst);
        tracing::debug!("qBittorrent authenticated successfully");
        Ok(())
    }

    /// Send a request built by `build`, logging in first if needed and once
    /// more if the session expired (HTTP 403)
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Result<reqwest::RequestBuilder>,
    {
        if !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }

        let response = build()?.send().await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        tracing::info!("qBittorrent session expired, logging in again");
        self.logged_in.store(false, Ordering::SeqCst);
        self.login().await?;
        Ok(build()?.send().await?)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::TorrentEngine(format!(
                "{} failed (HTTP {}): {}",
                what,
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(body)
    }
}

async fn read_torrent_file(path: &Path) -> Result<(String, Vec<u8>)> {
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.torrent".to_string());
    Ok((name, data))
}

#[async_trait]
impl TorrentEngine for QbittorrentClient {
    /// POST /api/v2/torrents/add
    async fn submit(&self, magnets: &[String], files: &[PathBuf]) -> Result<()> {
        if magnets.is_empty() && files.is_empty() {
            return Ok(());
        }

        let mut uploads = Vec::with_capacity(files.len());
        for path in files {
            uploads.push(read_torrent_file(path).await?);
        }

        let response = self
            .send(|| {
                let mut form = Form::new();
                if !magnets.is_empty() {
                    form = form.text("urls", magnets.join("\n"));
                }
                for (name, data) in &uploads {
                    let part = Part::bytes(data.clone())
                        .file_name(name.clone())
                        .mime_str("application/x-bittorrent")?;
                    form = form.part("torrents", part);
                }
                if let Some(save_path) = &self.save_path {
                    form = form.text("savepath", save_path.to_string_lossy().into_owned());
                }
                Ok(self.client.post(self.url("/torrents/add")).multipart(form))
            })
            .await?;

        if response.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Err(Error::TorrentEngine(
                "qBittorrent rejected the torrent files as invalid".to_string(),
            ));
        }
        let body = Self::check(response, "Adding torrents").await?;
        if body.trim() == "Fails." {
            return Err(Error::TorrentEngine(
                "qBittorrent refused to add the torrents".to_string(),
            ));
        }

        tracing::info!(
            magnets = magnets.len(),
            files = files.len(),
            "Submitted transfers to qBittorrent"
        );
        Ok(())
    }

    /// POST /api/v2/torrents/delete
    async fn remove(&self, hashes: &[String]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let joined = hashes.join("|");
        let response = self
            .send(|| {
                Ok(self
                    .client
                    .post(self.url("/torrents/delete"))
                    .form(&[("hashes", joined.as_str()), ("deleteFiles", "false")]))
            })
            .await?;
        Self::check(response, "Removing torrents").await?;
        Ok(())
    }

    /// GET /api/v2/torrents/info
    async fn poll(&self, hashes: &[String]) -> Result<Vec<TorrentStatus>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let joined = hashes.join("|");
        let response = self
            .send(|| {
                Ok(self
                    .client
                    .get(self.url("/torrents/info"))
                    .query(&[("hashes", joined.as_str())]))
            })
            .await?;
        let body = Self::check(response, "Querying torrents").await?;

        let torrents: Vec<TorrentInfo> = serde_json::from_str(&body).map_err(|e| {
            Error::TorrentEngine(format!("unexpected torrents/info response: {}", e))
        })?;
        Ok(torrents.into_iter().map(TorrentStatus::from).collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_login(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=session; path=/")
                    .set_body_string("Ok."),
            )
            .expect(expected)
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> QbittorrentClient {
        let config = TorrentEngineConfig {
            url: format!("{}/", server.uri()),
            username: "admin".to_string(),
            password: "secret".to_string(),
            save_path: Some(PathBuf::from("/downloads/anime")),
        };
        QbittorrentClient::new(&config, &HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn submit_sends_magnets_and_files_in_one_request() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(body_string_contains("magnet:?xt=urn:btih:aaa\nmagnet:?xt=urn:btih:bbb"))
            .and(body_string_contains("name=\"torrents\""))
            .and(body_string_contains("/downloads/anime"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ep01.torrent");
        std::fs::write(&file, b"d4:infod4:name1:aee").unwrap();

        client(&server)
            .submit(
                &[
                    "magnet:?xt=urn:btih:aaa".to_string(),
                    "magnet:?xt=urn:btih:bbb".to_string(),
                ],
                &[file],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_login_fails_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let err = client(&server)
            .poll(&["abc".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TorrentEngine(ref msg) if msg.contains("login rejected")));
    }

    #[tokio::test]
    async fn expired_session_logs_in_again_once() {
        let server = MockServer::start().await;
        mount_login(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let statuses = client(&server).poll(&["abc".to_string()]).await.unwrap();
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn poll_reads_progress_and_content_path() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(query_param("hashes", "aaa|bbb"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"hash":"AAA","name":"ep01.mkv","progress":1.0,"content_path":"/downloads/ep01.mkv","save_path":"/downloads"},
                    {"hash":"bbb","name":"Batch","progress":0.25,"save_path":"/downloads"}
                ]"#,
            ))
            .mount(&server)
            .await;

        let statuses = client(&server)
            .poll(&["aaa".to_string(), "bbb".to_string()])
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].hash, "aaa");
        assert!(statuses[0].is_complete());
        assert_eq!(statuses[0].content_path, PathBuf::from("/downloads/ep01.mkv"));
        assert!(!statuses[1].is_complete());
        assert_eq!(statuses[1].content_path, PathBuf::from("/downloads/Batch"));
    }

    #[tokio::test]
    async fn remove_keeps_files() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/delete"))
            .and(body_string_contains("hashes=aaa%7Cbbb"))
            .and(body_string_contains("deleteFiles=false"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .remove(&["aaa".to_string(), "bbb".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_requests_never_touch_the_engine() {
        let server = MockServer::start().await;
        let client = client(&server);

        client.submit(&[], &[]).await.unwrap();
        client.remove(&[]).await.unwrap();
        assert!(client.poll(&[]).await.unwrap().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
