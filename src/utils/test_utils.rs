#![cfg(test)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::api::ChatMessage;
use crate::core::engine::{EngineError, LoadProgress, LocalEngine, TokenStream};
use crate::core::engine_state::EngineState;

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("test client should build")
}

/// Collects every published state for later assertions.
pub fn record_states(
    handle: &crate::core::engine_state::EngineStateHandle,
) -> (
    Arc<StdMutex<Vec<EngineState>>>,
    crate::core::engine_state::Subscription,
) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = handle.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
    (seen, subscription)
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn path(&self) -> &str {
        self.request_line.split_whitespace().nth(1).unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    path: Option<String>,
    status: u16,
    content_type: &'static str,
    parts: Vec<(Duration, Vec<u8>)>,
}

impl MockResponse {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            path: None,
            status,
            content_type: "text/plain; charset=utf-8",
            parts: vec![(Duration::ZERO, body.as_bytes().to_vec())],
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self {
            content_type: "application/json",
            ..Self::text(status, body)
        }
    }

    /// A chunked body whose parts are flushed separately.
    pub fn chunked(status: u16, parts: &[&[u8]]) -> Self {
        Self {
            path: None,
            status,
            content_type: "text/plain; charset=utf-8",
            parts: parts
                .iter()
                .map(|part| (Duration::from_millis(5), part.to_vec()))
                .collect(),
        }
    }

    /// Only answer requests for `path`.
    pub fn at(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    fn matches(&self, path: &str) -> bool {
        self.path.as_deref().is_none_or(|expected| expected == path)
    }
}

/// In-process HTTP/1.1 stub that answers queued responses in order.
///
/// Unmatched requests get a `404`. Every request is captured.
pub struct MockServer {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockServer {
    pub async fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let queue = Arc::clone(&queue);
                let captured = Arc::clone(&captured);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, queue, captured).await;
                });
            }
        });

        Self { addr, requests }
    }

    /// A server that refuses connections: bind, then drop the listener.
    pub async fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        drop(listener);
        format!("http://{addr}")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }

    /// Waits until at least `count` requests arrived or a second elapsed.
    pub async fn wait_for_requests(&self, count: usize) -> Vec<CapturedRequest> {
        for _ in 0..100 {
            let requests = self.requests().await;
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests().await
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    queue: Arc<Mutex<VecDeque<MockResponse>>>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
) -> Result<(), String> {
    let request = read_http_request(&mut stream).await?;
    let path = request.path().to_string();
    captured.lock().await.push(request);

    let response = {
        let mut queue = queue.lock().await;
        let index = queue.iter().position(|response| response.matches(&path));
        index.and_then(|index| queue.remove(index))
    };
    let response = response.unwrap_or_else(|| MockResponse::text(404, "not found"));

    let head = format!(
        "HTTP/1.1 {} Mock\r\ncontent-type: {}\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
        response.status, response.content_type
    );
    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|err| err.to_string())?;
    stream.flush().await.map_err(|err| err.to_string())?;

    for (delay, part) in response.parts {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if part.is_empty() {
            continue;
        }
        let mut frame = format!("{:x}\r\n", part.len()).into_bytes();
        frame.extend_from_slice(&part);
        frame.extend_from_slice(b"\r\n");
        stream
            .write_all(&frame)
            .await
            .map_err(|err| err.to_string())?;
        stream.flush().await.map_err(|err| err.to_string())?;
    }
    stream
        .write_all(b"0\r\n\r\n")
        .await
        .map_err(|err| err.to_string())?;
    stream.shutdown().await.map_err(|err| err.to_string())
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("connection closed before headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

/// A [`LocalEngine`] that replays a fixed script on the tokio clock.
#[derive(Default)]
pub struct ScriptedEngine {
    progress: Vec<LoadProgress>,
    load_error: Option<EngineError>,
    load_delay: Duration,
    tokens: Vec<(Duration, String)>,
    stream_error: Option<EngineError>,
    stall_calls: usize,
    loads: AtomicUsize,
    seen: StdMutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, steps: &[(f64, &str)]) -> Self {
        self.progress = steps
            .iter()
            .map(|(fraction, stage)| LoadProgress::new(*fraction, *stage))
            .collect();
        self
    }

    pub fn failing_load(mut self, error: EngineError) -> Self {
        self.load_error = Some(error);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Tokens emitted after waiting `delay_ms` each.
    pub fn with_tokens(mut self, tokens: &[(u64, &str)]) -> Self {
        self.tokens = tokens
            .iter()
            .map(|(delay, token)| (Duration::from_millis(*delay), token.to_string()))
            .collect();
        self
    }

    /// End the token stream with `error` after the scripted tokens.
    pub fn failing_stream(mut self, error: EngineError) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// Never finish the token stream after the scripted tokens.
    pub fn stalling(mut self) -> Self {
        self.stall_calls = usize::MAX;
        self
    }

    /// Stall only the first stream; later ones finish normally.
    pub fn stalling_once(mut self) -> Self {
        self.stall_calls = 1;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn seen_messages(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalEngine for ScriptedEngine {
    async fn load(
        &self,
        on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<(), EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        for step in &self.progress {
            on_progress(step.clone());
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        match &self.load_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, EngineError> {
        let stall = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(messages);
            seen.len() <= self.stall_calls
        };
        let tokens = self.tokens.clone();
        let stream_error = self.stream_error.clone();
        let stream = async_stream::stream! {
            for (delay, token) in tokens {
                tokio::time::sleep(delay).await;
                yield Ok(token);
            }
            if let Some(err) = stream_error {
                yield Err(err);
                return;
            }
            if stall {
                futures_util::future::pending::<()>().await;
            }
        };
        Ok(Box::pin(stream))
    }
}
