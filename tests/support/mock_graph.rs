//! A minimal HTTP/1.1 server standing in for the identity platform and Graph.
//!
//! Every connection carries exactly one request and is closed after the
//! response. Token requests are answered with a fresh token each time;
//! `sendMail` requests are answered from a scripted list of statuses, falling
//! back to `202 Accepted` once the list is exhausted.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use graph_relay::delivery::GraphEndpoints;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};

pub const TENANT: &str = "6f1d3c2a-9a4e-4d53-8b1e-2f8f6a1c0b7d";
pub const SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_token_request(&self) -> bool {
        self.path.ends_with("/oauth2/v2.0/token")
    }
}

#[derive(Default)]
struct State {
    requests: Mutex<Vec<RecordedRequest>>,
    send_statuses: Mutex<VecDeque<u16>>,
    tokens_issued: AtomicUsize,
}

pub struct MockGraphServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl MockGraphServer {
    pub async fn start() -> Self {
        Self::with_send_statuses([]).await
    }

    /// Answer the first `sendMail` requests with `statuses`, in order.
    pub async fn with_send_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock Graph server");
        let addr = listener.local_addr().expect("Mock Graph server address");

        let state = Arc::new(State {
            send_statuses: Mutex::new(statuses.into_iter().collect()),
            ..State::default()
        });

        let handle = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle_connection(stream, state.clone()));
                }
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoints(&self) -> GraphEndpoints {
        GraphEndpoints {
            token_url: format!("http://{}/{TENANT}/oauth2/v2.0/token", self.addr),
            graph_base: format!("http://{}/v1.0", self.addr),
            scope: SCOPE.to_string(),
        }
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub async fn token_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(RecordedRequest::is_token_request)
            .collect()
    }

    pub async fn send_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|request| request.path.ends_with("/sendMail"))
            .collect()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockGraphServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut BufReader<TcpStream>) -> Option<RecordedRequest> {
    let mut line = String::new();
    stream.read_line(&mut line).await.ok()?;

    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        stream.read_line(&mut line).await.ok()?;
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }

        let (key, value) = header.split_once(':')?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = vec![0; length];
    stream.read_exact(&mut body).await.ok()?;

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

async fn handle_connection(stream: TcpStream, state: Arc<State>) {
    let mut stream = BufReader::new(stream);
    let Some(request) = read_request(&mut stream).await else {
        return;
    };

    let (status, body) = if request.is_token_request() {
        let n = state.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        (
            200,
            format!(r#"{{"token_type":"Bearer","expires_in":3599,"access_token":"token-{n}"}}"#),
        )
    } else if request.path.ends_with("/sendMail") {
        let status = state.send_statuses.lock().await.pop_front().unwrap_or(202);
        let body = if status < 300 {
            String::new()
        } else {
            format!(r#"{{"error":{{"code":"Status{status}","message":"Scripted failure"}}}}"#)
        };
        (status, body)
    } else {
        (404, String::new())
    };

    state.requests.lock().await.push(request);

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.get_mut().write_all(response.as_bytes()).await;
    let _ = stream.get_mut().shutdown().await;
}
