//! Scripted transport for unit tests

use crate::api::{CloudClient, HttpReply, HttpRequest, Transport, TransportError};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use url::Url;

/// Replies are queued per key; the last one keeps answering once the queue
/// is down to a single entry. Keys are the command name, or
/// `queryAsyncJobResult:<jobid>` for job polls.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<HttpReply, TransportError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, key: &str, status: u16, body: Value) {
        self.push(
            key,
            Ok(HttpReply {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&self, key: &str, err: TransportError) {
        self.push(key, Err(err));
    }

    fn push(&self, key: &str, reply: Result<HttpReply, TransportError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| request_key(&r.url) == key)
            .count()
    }

    fn next_reply(&self, key: &str) -> Result<HttpReply, TransportError> {
        let mut replies = self.replies.lock().unwrap();
        let scripted = replies.get_mut(key).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        scripted.unwrap_or_else(|| {
            Ok(HttpReply {
                status: 530,
                body: serde_json::json!({
                    "errorresponse": {"errorcode": 530, "errortext": format!("no scripted reply for {}", key)}
                })
                .to_string(),
            })
        })
    }
}

pub fn request_key(url: &Url) -> String {
    let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let command = pairs.get("command").cloned().unwrap_or_default();
    match pairs.get("jobid") {
        Some(job_id) if command == "queryAsyncJobResult" => format!("{}:{}", command, job_id),
        _ => command,
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpReply, TransportError>> {
        let key = request_key(&request.url);
        self.requests.lock().unwrap().push(request);
        let reply = self.next_reply(&key);
        Box::pin(async move { reply })
    }
}

pub fn test_client(transport: Arc<FakeTransport>) -> Arc<CloudClient> {
    let endpoint = Url::parse("http://cloud.test/client/api").unwrap();
    let client = CloudClient::new(endpoint, transport);
    client.set_session_key(Some("test-session".to_string()));
    Arc::new(client)
}

pub fn job_reply(status: i64, result: Value) -> Value {
    serde_json::json!({
        "queryasyncjobresultresponse": {"jobstatus": status, "jobresult": result}
    })
}
