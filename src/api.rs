//! Orchestration API client
//!
//! Low-level client for the management server's command API. Every call is a
//! query-string command answered by a JSON envelope named after the command.

use futures::future::BoxFuture;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Session expired or not logged in")]
    Unauthorized,
    #[error("Management server unreachable: {0}")]
    Network(String),
    #[error("API error {code}: {text}")]
    Application { code: u16, text: String },
    #[error("Malformed response from management server")]
    Malformed,
}

impl ApiError {
    /// Text recorded on the failing row. Empty when the server gave none.
    pub fn error_text(&self) -> String {
        match self {
            ApiError::Unauthorized => "Session expired".to_string(),
            ApiError::Network(msg) => msg.clone(),
            ApiError::Application { text, .. } => text.clone(),
            ApiError::Malformed => String::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Network(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

pub type Params = Vec<(String, String)>;

pub fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub form: Params,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            form: Vec::new(),
        }
    }

    pub fn post(url: Url, form: Params) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The HTTP exchange underneath the client.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpReply, TransportError>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        // The cookie store keeps the servlet session that goes with the session key
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpReply, TransportError>> {
        Box::pin(async move {
            let builder = match request.method {
                HttpMethod::Get => self.client.get(request.url),
                HttpMethod::Post => self.client.post(request.url).form(&request.form),
            };
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(HttpReply { status, body })
        })
    }
}

/// Appends the command, its parameters, the response format and the session
/// key. With no session the key is simply left out.
pub fn build_url(
    endpoint: &Url,
    session_key: Option<&str>,
    command: &str,
    params: &[(String, String)],
) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("command", command);
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("response", "json");
        if let Some(key) = session_key {
            query.append_pair("sessionkey", key);
        }
    }
    url
}

pub fn envelope_key(command: &str) -> String {
    format!("{}response", command.to_lowercase())
}

/// Unwraps the `<command>response` envelope of a reply, classifying failures.
pub fn parse_reply(command: &str, reply: &HttpReply) -> Result<Value, ApiError> {
    if reply.status == 401 {
        return Err(ApiError::Unauthorized);
    }

    let body: Value = match serde_json::from_str(&reply.body) {
        Ok(body) => body,
        Err(e) => {
            warn!(
                "Non-JSON reply to {} (HTTP {}): {}",
                command, reply.status, e
            );
            return Err(ApiError::Malformed);
        }
    };

    let envelope = body
        .get(envelope_key(command))
        .cloned()
        .or_else(|| error_envelope(&body));

    let Some(envelope) = envelope else {
        if reply.status >= 400 {
            return Err(ApiError::Application {
                code: reply.status,
                text: String::new(),
            });
        }
        return Err(ApiError::Malformed);
    };

    let error_code = envelope.get("errorcode").and_then(Value::as_u64);
    if error_code.is_some() || reply.status >= 400 {
        let code = error_code
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(reply.status);
        if code == 401 {
            return Err(ApiError::Unauthorized);
        }
        let text = envelope
            .get("errortext")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ApiError::Application { code, text });
    }

    Ok(envelope)
}

// Errors come back under "errorresponse" or under the command's own envelope
fn error_envelope(body: &Value) -> Option<Value> {
    body.as_object()?
        .values()
        .find(|v| v.get("errortext").is_some() || v.get("errorcode").is_some())
        .cloned()
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(Value),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct JobResultEnvelope {
    jobstatus: i64,
    #[serde(default)]
    jobresult: Option<Value>,
}

pub fn parse_job_status(envelope: Value) -> Result<JobStatus, ApiError> {
    let job: JobResultEnvelope =
        serde_json::from_value(envelope).map_err(|_| ApiError::Malformed)?;

    Ok(match job.jobstatus {
        1 => JobStatus::Succeeded(job.jobresult.unwrap_or(Value::Null)),
        2 => {
            let text = job
                .jobresult
                .as_ref()
                .and_then(|r| r.get("errortext"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            JobStatus::Failed(text)
        }
        // 0 and anything unknown keep the job polling
        _ => JobStatus::Pending,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInfo {
    pub sessionkey: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub domainid: String,
}

pub struct CloudClient {
    endpoint: Url,
    transport: Arc<dyn Transport>,
    session: RwLock<Option<String>>,
}

impl CloudClient {
    pub fn new(endpoint: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
            session: RwLock::new(None),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn session_key(&self) -> Option<String> {
        self.session
            .read()
            .map(|guard| (*guard).clone())
            .unwrap_or(None)
    }

    pub fn set_session_key(&self, key: Option<String>) {
        if let Ok(mut guard) = self.session.write() {
            *guard = key;
        }
    }

    pub fn has_session(&self) -> bool {
        self.session_key().is_some()
    }

    pub fn url_for(&self, command: &str, params: &[(String, String)]) -> Url {
        build_url(
            &self.endpoint,
            self.session_key().as_deref(),
            command,
            params,
        )
    }

    /// Runs one command and returns its response envelope.
    pub async fn execute(
        &self,
        command: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let url = self.url_for(command, params);
        debug!("API call: {}", command);
        let reply = self.transport.send(HttpRequest::get(url)).await?;
        parse_reply(command, &reply)
    }

    pub async fn query_async_job_result(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        let envelope = self
            .execute("queryAsyncJobResult", &[param("jobid", job_id)])
            .await?;
        parse_job_status(envelope)
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        domain: &str,
    ) -> Result<LoginInfo, ApiError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("command", "login")
            .append_pair("response", "json");

        // Credentials travel in the form body, never in the URL
        let form = vec![
            param("username", username),
            param("password", password),
            param("domain", domain),
        ];

        let reply = self.transport.send(HttpRequest::post(url, form)).await?;
        let envelope = parse_reply("login", &reply).map_err(|e| match e {
            ApiError::Unauthorized => ApiError::Application {
                code: 401,
                text: "Invalid username or password".to_string(),
            },
            other => other,
        })?;

        let info: LoginInfo = serde_json::from_value(envelope).map_err(|_| ApiError::Malformed)?;
        self.set_session_key(Some(info.sessionkey.clone()));
        Ok(info)
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self.execute("logout", &[]).await;
        self.set_session_key(None);
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_client, FakeTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn endpoint() -> Url {
        Url::parse("http://cloud.test/client/api").unwrap()
    }

    fn reply(status: u16, body: Value) -> HttpReply {
        HttpReply {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_build_url_with_session() {
        let url = build_url(
            &endpoint(),
            Some("abc+/="),
            "startVirtualMachine",
            &[param("id", "42")],
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                param("command", "startVirtualMachine"),
                param("id", "42"),
                param("response", "json"),
                param("sessionkey", "abc+/="),
            ]
        );
    }

    #[test]
    fn test_build_url_without_session_omits_key() {
        let url = build_url(&endpoint(), None, "listZones", &[]);
        assert!(url.query_pairs().all(|(k, _)| k != "sessionkey"));
        assert!(url.query_pairs().any(|(k, v)| k == "response" && v == "json"));
    }

    #[test]
    fn test_parse_reply_returns_envelope() {
        let envelope = parse_reply(
            "startVirtualMachine",
            &reply(200, json!({"startvirtualmachineresponse": {"jobid": "job-1"}})),
        )
        .unwrap();
        assert_eq!(envelope, json!({"jobid": "job-1"}));
    }

    #[test]
    fn test_parse_reply_http_401_is_unauthorized() {
        let err = parse_reply("listZones", &reply(401, json!({}))).unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[test]
    fn test_parse_reply_error_envelope() {
        let err = parse_reply(
            "deployVirtualMachine",
            &reply(
                431,
                json!({"errorresponse": {"errorcode": 431, "errortext": "Unable to find template"}}),
            ),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ApiError::Application {
                code: 431,
                text: "Unable to find template".to_string()
            }
        );
    }

    #[test]
    fn test_parse_reply_errorcode_401_in_body() {
        let err = parse_reply(
            "listZones",
            &reply(
                200,
                json!({"listzonesresponse": {"errorcode": 401, "errortext": "unable to verify user credentials"}}),
            ),
        )
        .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[test]
    fn test_parse_reply_non_json_degrades_to_empty_text() {
        let err = parse_reply(
            "listZones",
            &HttpReply {
                status: 502,
                body: "<html>Bad Gateway</html>".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(err, ApiError::Malformed);
        assert_eq!(err.error_text(), "");
    }

    #[test]
    fn test_parse_job_status() {
        assert_eq!(
            parse_job_status(json!({"jobid": "j", "jobstatus": 0})).unwrap(),
            JobStatus::Pending
        );
        assert_eq!(
            parse_job_status(json!({"jobstatus": 1, "jobresult": {"virtualmachine": {"id": "42"}}}))
                .unwrap(),
            JobStatus::Succeeded(json!({"virtualmachine": {"id": "42"}}))
        );
        assert_eq!(
            parse_job_status(json!({"jobstatus": 2, "jobresult": {"errortext": "insufficient capacity"}}))
                .unwrap(),
            JobStatus::Failed("insufficient capacity".to_string())
        );
        assert_eq!(
            parse_job_status(json!({"jobstatus": 2})).unwrap(),
            JobStatus::Failed(String::new())
        );
        assert_eq!(parse_job_status(json!({"nope": 1})), Err(ApiError::Malformed));
    }

    #[tokio::test]
    async fn test_login_stores_session_key_and_posts_credentials() {
        let transport = FakeTransport::new();
        transport.reply(
            "login",
            200,
            json!({"loginresponse": {"sessionkey": "s3cr3t", "username": "admin", "account": "admin"}}),
        );
        let client = CloudClient::new(endpoint(), transport.clone());

        let info = client.login("admin", "password", "/").await.unwrap();
        assert_eq!(info.username, "admin");
        assert_eq!(client.session_key().as_deref(), Some("s3cr3t"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert!(requests[0].url.query_pairs().all(|(k, _)| k != "password"));
        assert!(requests[0].form.contains(&param("password", "password")));
    }

    #[tokio::test]
    async fn test_login_rejected_credentials_are_an_application_error() {
        let transport = FakeTransport::new();
        transport.reply("login", 401, json!({}));
        let client = CloudClient::new(endpoint(), transport.clone());

        let err = client.login("admin", "wrong", "/").await.unwrap_err();
        assert!(matches!(err, ApiError::Application { code: 401, .. }));
        assert!(!client.has_session());
    }

    #[tokio::test]
    async fn test_execute_attaches_session_key() {
        let transport = FakeTransport::new();
        transport.reply("listZones", 200, json!({"listzonesresponse": {"count": 0}}));
        let client = test_client(transport.clone());

        client.execute("listZones", &[]).await.unwrap();
        let url = &transport.requests()[0].url;
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "sessionkey" && v == "test-session"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let transport = FakeTransport::new();
        transport.fail("listZones", TransportError::Connect("refused".to_string()));
        let client = test_client(transport);

        let err = client.execute("listZones", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
