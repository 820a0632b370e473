//! Scripted in-memory transport for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tunesync_core::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Scripted = Result<HttpResponse, TransportError>;

/// Answers requests from a queue, in order, and records every request.
///
/// An exhausted queue answers with a connect error.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_text(&self, status: u16, body: &str) {
        self.push(HttpResponse::new(status, body));
    }

    pub fn push_json(&self, status: u16, body: &serde_json::Value) {
        self.push(HttpResponse::new(status, body.to_string()));
    }

    pub fn push_timeout(&self) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError::Timeout {
                url: "scripted".into(),
                timeout_ms: 1000,
            }));
    }

    /// Sleep before answering each request
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(TransportError::Connect {
                url,
                reason: "no scripted response".into(),
            })
        })
    }
}
