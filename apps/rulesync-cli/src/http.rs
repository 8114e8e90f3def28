// http.rs — PolicyClient backed by the project's run service.
//
// The service exposes two routes:
//   GET  <url>/firestoreRules      → { source: [{ content }], createTime?, name? }
//                                    or { code, message } on failure
//   POST <url>/setFirestoreRules   { ruleset } → { success, message? }

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rulesync_workflow::{AuthToken, ClientError, PolicyClient, PublishOutcome, RawPolicyDocument, TargetId};
use serde::{Deserialize, Serialize};

/// Error code the service returns when the project has no rules yet.
pub const NOT_FOUND_CODE: &str = "security-rules/not-found";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesResponse {
    #[serde(default)]
    source: Vec<RulesSource>,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    /// Ruleset name, used as the document version.
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RulesSource {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct SetRulesRequest<'a> {
    ruleset: &'a str,
}

#[derive(Debug, Deserialize)]
struct SetRulesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

pub struct RunServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl RunServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn route(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

#[async_trait]
impl PolicyClient for RunServiceClient {
    async fn fetch_policy(
        &self,
        target: &TargetId,
        token: &AuthToken,
    ) -> Result<RawPolicyDocument, ClientError> {
        let response = self
            .http
            .get(self.route("firestoreRules"))
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(ClientError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ClientError::transport)?;
        tracing::debug!(project = %target, %status, bytes = body.len(), "rules fetched");
        parse_rules_response(target, status, &body)
    }

    async fn publish_policy(
        &self,
        _target: &TargetId,
        token: &AuthToken,
        content: &str,
    ) -> Result<PublishOutcome, ClientError> {
        let response = self
            .http
            .post(self.route("setFirestoreRules"))
            .bearer_auth(token.secret())
            .json(&SetRulesRequest { ruleset: content })
            .send()
            .await
            .map_err(ClientError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ClientError::transport)?;
        parse_publish_response(status, &body)
    }

    fn name(&self) -> &str {
        "run-service"
    }
}

fn parse_rules_response(
    target: &TargetId,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<RawPolicyDocument, ClientError> {
    let parsed: Result<RulesResponse, _> = serde_json::from_str(body);
    match parsed {
        Ok(RulesResponse { code: Some(code), .. }) if code == NOT_FOUND_CODE => {
            Err(ClientError::NotFound {
                target: target.to_string(),
            })
        }
        Ok(RulesResponse {
            code: Some(code),
            message,
            ..
        }) => Err(ClientError::transport(match message {
            Some(message) => format!("{code}: {message}"),
            None => code,
        })),
        _ if !status.is_success() => Err(ClientError::transport(format!(
            "rules request returned {status}"
        ))),
        Ok(response) => {
            let content = response
                .source
                .into_iter()
                .next()
                .map(|source| source.content)
                .unwrap_or_default();
            let mut raw = RawPolicyDocument::new(content);
            if let Some(name) = response.name {
                raw = raw.with_version(name);
            }
            if let Some(time) = response.create_time {
                raw = raw.with_update_time(time);
            }
            Ok(raw)
        }
        Err(e) => Err(ClientError::transport(format!("unreadable rules response: {e}"))),
    }
}

fn parse_publish_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<PublishOutcome, ClientError> {
    match serde_json::from_str::<SetRulesResponse>(body) {
        Ok(response) => Ok(PublishOutcome {
            success: response.success && status.is_success(),
            message: response.message,
        }),
        Err(_) if !status.is_success() => Err(ClientError::transport(format!(
            "publish request returned {status}"
        ))),
        Err(e) => Err(ClientError::transport(format!("unreadable publish response: {e}"))),
    }
}
