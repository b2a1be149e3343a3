//! One-shot HTTP calls that precede or accompany the channel.
//!
//! Every request goes through a cookie-keeping client so the server-side
//! session (the `user_uuid` cookie) sticks across calls. None of these calls
//! depend on channel state.

use chargeback_proto::{ClaimId, HistoryBody, HistoryRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

static USER_UUID_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"user_uuid=([^;]+)").expect("static cookie pattern"));

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} failed: unexpected status {status} body={body}")]
    RequestFailed {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Key/value description of the disputed transaction. Entries without a
/// value are kept for bookkeeping but never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionAttributes {
    entries: Vec<(String, Option<String>)>,
}

impl TransactionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), Some(value.into())));
        self
    }

    pub fn with_optional(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    /// Top-level fields of a JSON object; `null` becomes a missing value,
    /// strings are sent verbatim and everything else as its JSON text.
    pub fn from_json(value: &Value) -> Self {
        let entries = value
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .map(|(key, value)| {
                        let rendered = match value {
                            Value::Null => None,
                            Value::String(text) => Some(text.clone()),
                            other => Some(other.to_string()),
                        };
                        (key.clone(), rendered)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_deref().map(|value| (key.as_str(), value)))
    }
}

#[derive(Clone)]
pub struct BootstrapClient {
    http: Client,
    base_url: String,
}

impl BootstrapClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BootstrapError> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a claim for the given transaction and returns its id. A body
    /// without a usable `id` yields claim 0.
    pub async fn start_new_claim(
        &self,
        attributes: &TransactionAttributes,
    ) -> Result<ClaimId, BootstrapError> {
        let mut url = Url::parse(&format!("{}/start_new_claim", self.base_url))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in attributes.query_pairs() {
                query.append_pair(key, value);
            }
        }
        // no pairs would leave a bare `?`
        if url.query() == Some("") {
            url.set_query(None);
        }
        let res = self.get("start new claim", url.as_str()).await?;
        let body: Value = res.json().await?;
        let claim_id = claim_id_from_body(&body);
        debug!(target = "chargeback.bootstrap", claim_id = %claim_id, "claim created");
        Ok(claim_id)
    }

    pub async fn get_messages(&self, claim_id: ClaimId) -> Result<Vec<HistoryRecord>, BootstrapError> {
        let url = format!("{}/get_messages/{}", self.base_url, claim_id);
        let res = self.get("get messages", &url).await?;
        let body: HistoryBody = res.json().await?;
        Ok(body.into_records())
    }

    /// Establishes (or resumes, when `uuid` is given) the server session and
    /// returns the session id from the `user_uuid` cookie, falling back to the
    /// supplied uuid.
    pub async fn login(&self, uuid: Option<&str>) -> Result<String, BootstrapError> {
        let url = format!("{}/login/{}", self.base_url, uuid.unwrap_or("new"));
        let res = self.get("login", &url).await?;
        let issued = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookie| {
                USER_UUID_COOKIE
                    .captures(cookie)
                    .and_then(|captures| captures.get(1))
                    .map(|m| m.as_str().to_string())
            });
        Ok(issued
            .or_else(|| uuid.map(str::to_string))
            .unwrap_or_default())
    }

    /// HTML view of the claim for the merchant side.
    pub async fn get_merchant_view(&self, claim_id: ClaimId) -> Result<String, BootstrapError> {
        let url = format!("{}/merchant_view/{}", self.base_url, claim_id);
        let res = self.get("get merchant view", &url).await?;
        Ok(res.text().await?)
    }

    pub async fn get_structured_data(&self, claim_id: ClaimId) -> Result<Value, BootstrapError> {
        let url = format!("{}/structured_data/{}", self.base_url, claim_id);
        let res = self.get("fetch structured data", &url).await?;
        Ok(res.json().await?)
    }

    async fn get(&self, operation: &'static str, url: &str) -> Result<Response, BootstrapError> {
        debug!(target = "chargeback.bootstrap", operation, url, "GET");
        let res = self.http.get(url).send().await?;
        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(BootstrapError::RequestFailed {
                operation,
                status,
                body,
            })
        }
    }
}

/// Accepts `id` as a number or a numeric string.
fn claim_id_from_body(body: &Value) -> ClaimId {
    let id = match body.get("id") {
        Some(Value::Number(id)) => id.as_u64(),
        Some(Value::String(id)) => id.trim().parse().ok(),
        _ => None,
    };
    ClaimId(id.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claim_id_accepts_numeric_strings() {
        assert_eq!(claim_id_from_body(&json!({"id": 17})), ClaimId(17));
        assert_eq!(claim_id_from_body(&json!({"id": "17"})), ClaimId(17));
        assert_eq!(claim_id_from_body(&json!({"id": "abc"})), ClaimId(0));
        assert_eq!(claim_id_from_body(&json!({"id": null})), ClaimId(0));
        assert_eq!(claim_id_from_body(&json!({})), ClaimId(0));
    }

    #[test]
    fn attributes_skip_missing_values() {
        let attributes = TransactionAttributes::new()
            .with("merchant_name", "ABC Store")
            .with_optional("merchant_email", None)
            .with("amount", "49.99");
        let pairs: Vec<_> = attributes.query_pairs().collect();
        assert_eq!(pairs, [("merchant_name", "ABC Store"), ("amount", "49.99")]);
    }

    #[test]
    fn attributes_from_json_render_scalars() {
        let attributes = TransactionAttributes::from_json(&json!({
            "transaction_id": "TX1234567890",
            "amount": 12.5,
            "recurring": false,
            "note": null
        }));
        let mut pairs: Vec<_> = attributes.query_pairs().collect();
        pairs.sort();
        assert_eq!(
            pairs,
            [("amount", "12.5"), ("recurring", "false"), ("transaction_id", "TX1234567890")]
        );
    }

    #[test]
    fn attributes_from_non_object_are_empty() {
        assert_eq!(TransactionAttributes::from_json(&json!([1, 2])).query_pairs().count(), 0);
    }

    #[test]
    fn cookie_pattern_extracts_uuid() {
        let captures = USER_UUID_COOKIE
            .captures("user_uuid=6f1c2a; Path=/; HttpOnly")
            .expect("match");
        assert_eq!(&captures[1], "6f1c2a");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BootstrapClient::with_client(Client::new(), "http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
    }
}
