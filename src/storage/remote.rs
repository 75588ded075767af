// src/storage/remote.rs — Account storage on a running Dostt server
//
// Lets a terminal call bill against the server's database over its HTTP API:
// the balance is read with GET /api/users/{id} and written back once with
// PATCH /api/users/{id}/coins.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::store::{CallRow, CompanionRow, NewCall, UserRow};
use super::AccountStore;
use crate::infra::errors::DosttError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteAccountStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RemoteAccountStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, username: &str) -> anyhow::Result<UserRow> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "username": username }))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    /// `None` when the server does not know the user.
    pub async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<UserRow>> {
        let response = self
            .client
            .get(self.url(&format!("/api/users/{user_id}")))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.json().await?))
    }

    pub async fn list_companions(&self) -> anyhow::Result<Vec<CompanionRow>> {
        let response = self
            .client
            .get(self.url("/api/companions"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn create_call(&self, call: &NewCall) -> anyhow::Result<CallRow> {
        let response = self
            .client
            .post(self.url("/api/calls"))
            .timeout(REQUEST_TIMEOUT)
            .json(call)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into an error carrying the server's message.
async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);
    anyhow::bail!("HTTP {status}: {message}")
}

#[async_trait]
impl AccountStore for RemoteAccountStore {
    async fn get_balance(&self, user_id: i64) -> anyhow::Result<i64> {
        match self.get_user(user_id).await? {
            Some(user) => Ok(user.coins),
            None => Err(DosttError::UserNotFound { user_id }.into()),
        }
    }

    async fn set_balance(&self, user_id: i64, coins: u64) -> anyhow::Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/api/users/{user_id}/coins")))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "coins": coins }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DosttError::UserNotFound { user_id }.into());
        }
        check(response).await?;
        Ok(())
    }

    async fn record_call(&self, call: &NewCall) -> anyhow::Result<()> {
        self.create_call(call).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let remote = RemoteAccountStore::new("http://127.0.0.1:5000/");
        assert_eq!(remote.url("/api/health"), "http://127.0.0.1:5000/api/health");
    }

    #[test]
    fn test_error_body_reads_message() {
        let body: ErrorBody = serde_json::from_str(r#"{"message":"User 3 not found"}"#).unwrap();
        assert_eq!(body.message, "User 3 not found");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is not expected to run an HTTP server
        let remote = RemoteAccountStore::new("http://127.0.0.1:9");
        assert!(remote.get_balance(1).await.is_err());
    }
}
