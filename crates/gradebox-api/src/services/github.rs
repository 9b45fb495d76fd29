//! GitHub REST client for source archives and check runs.

use async_trait::async_trait;
use bytes::Bytes;
use gradebox_core::check::{CheckRunUpdate, CodeHost, NewCheckRun};
use gradebox_core::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;

const USER_AGENT: &str = "gradebox";
const ACCEPT: &str = "application/vnd.github+json";

/// Supplies access tokens for app installations.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn installation_token(&self, installation_id: i64) -> Result<String>;
}

/// One token for every installation, e.g. a personal access token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn installation_token(&self, _installation_id: i64) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    id: i64,
}

/// GitHub API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, owner, repo, path)
    }

    async fn send(
        &self,
        installation_id: i64,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<reqwest::Response> {
        let token = self.tokens.installation_token(installation_id).await?;
        let response = request
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .send()
            .await
            .map_err(|e| Error::CodeHost(format!("{}: {}", action, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::CodeHost(format!("{}: {} {}", action, status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn archive(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        commit: &str,
    ) -> Result<Bytes> {
        let url = self.repo_url(owner, repo, &format!("zipball/{}", commit));
        let response = self
            .send(installation_id, self.client.get(url), "archive")
            .await?;
        response
            .bytes()
            .await
            .map_err(|e| Error::CodeHost(format!("archive: {}", e)))
    }

    async fn create_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        check_run: &NewCheckRun,
    ) -> Result<i64> {
        let url = self.repo_url(owner, repo, "check-runs");
        let response = self
            .send(
                installation_id,
                self.client.post(url).json(check_run),
                "create check run",
            )
            .await?;
        let created: CheckRunResponse = response
            .json()
            .await
            .map_err(|e| Error::CodeHost(format!("create check run: {}", e)))?;
        Ok(created.id)
    }

    async fn update_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        update: &CheckRunUpdate,
    ) -> Result<()> {
        let url = self.repo_url(owner, repo, &format!("check-runs/{}", update.id));
        self.send(
            installation_id,
            self.client.patch(url).json(update),
            "update check run",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebox_core::check::{CheckRunOutput, CheckStatus, Conclusion};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(server.uri(), Arc::new(StaticToken::new("t0ken")))
    }

    #[tokio::test]
    async fn test_archive_downloads_zipball() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/stdlib/zipball/abc123"))
            .and(header("Authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let archive = client(&server)
            .archive(42, "alice", "stdlib", "abc123")
            .await
            .unwrap();
        assert_eq!(archive.as_ref(), b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_create_check_run_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/alice/stdlib/check-runs"))
            .and(body_json(json!({
                "name": "gradebox",
                "head_sha": "abc123",
                "status": "queued",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1001 })))
            .mount(&server)
            .await;

        let id = client(&server)
            .create_check_run(
                42,
                "alice",
                "stdlib",
                &NewCheckRun {
                    name: "gradebox".to_string(),
                    head_sha: "abc123".to_string(),
                    status: CheckStatus::Queued,
                    details_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(id, 1001);
    }

    #[tokio::test]
    async fn test_update_check_run_patches_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/alice/stdlib/check-runs/1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1001 })))
            .expect(1)
            .mount(&server)
            .await;

        let update = CheckRunUpdate::completed(
            1001,
            Conclusion::Success,
            CheckRunOutput {
                title: "Success".to_string(),
                summary: String::new(),
            },
        );
        client(&server)
            .update_check_run(42, "alice", "stdlib", &update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let err = client(&server)
            .archive(42, "alice", "stdlib", "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CodeHost(_)));
        assert!(err.to_string().contains("404"));
    }
}
