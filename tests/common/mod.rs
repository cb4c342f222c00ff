#![allow(dead_code)]

use std::time::Duration;

use prompt_relay::config::{BackendConfig, RelayConfig, StubConfig};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub fn config_for(server: &MockServer) -> RelayConfig {
    config_for_url(&server.uri())
}

pub fn config_for_url(base_url: &str) -> RelayConfig {
    RelayConfig {
        backend: BackendConfig {
            probe_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
            ..BackendConfig::new(base_url, "llama3")
        },
        stub: StubConfig {
            token_delay: Duration::ZERO,
        },
        ..RelayConfig::default()
    }
}

pub async fn live_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3:latest"}]})))
        .mount(&server)
        .await;
    server
}

// Nothing mounted, so the tags endpoint answers 404.
pub async fn unreachable_backend() -> MockServer {
    MockServer::start().await
}

pub async fn mount_generate(server: &MockServer, stream: bool, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3", "stream": stream})))
        .respond_with(template)
        .mount(server)
        .await;
}

#[derive(Debug, Clone, Copy)]
pub enum BrokenGenerate {
    DropConnection,
    OneChunkThenDrop,
    OneChunkThenStall,
}

const TAGS_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 13\r\nConnection: close\r\n\r\n{\"models\":[]}";
const STREAM_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n";
const FIRST_CHUNK: &str = "{\"response\":\"Hel\"}\n";

// Healthy tags endpoint, with a generate endpoint that fails at the transport level.
pub async fn broken_backend(mode: BrokenGenerate) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener binds");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_broken(socket, mode));
        }
    });
    format!("http://{addr}")
}

async fn serve_broken(mut socket: TcpStream, mode: BrokenGenerate) {
    let Some(head) = read_request(&mut socket).await else {
        return;
    };

    if head.starts_with("GET /api/tags") {
        let _ = socket.write_all(TAGS_RESPONSE.as_bytes()).await;
        let _ = socket.shutdown().await;
        return;
    }

    match mode {
        BrokenGenerate::DropConnection => {}
        BrokenGenerate::OneChunkThenDrop | BrokenGenerate::OneChunkThenStall => {
            let chunk = format!("{:x}\r\n{FIRST_CHUNK}\r\n", FIRST_CHUNK.len());
            let _ = socket.write_all(STREAM_HEAD.as_bytes()).await;
            let _ = socket.write_all(chunk.as_bytes()).await;
            let _ = socket.flush().await;
            if matches!(mode, BrokenGenerate::OneChunkThenStall) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

// Reads the request head and any body announced by Content-Length.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        let read = socket.read(&mut buf).await.ok()?;
        if read == 0 {
            return None;
        }
        received.extend_from_slice(&buf[..read]);
        if let Some(pos) = received.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while received.len() - head_end < content_length {
        let read = socket.read(&mut buf).await.ok()?;
        if read == 0 {
            break;
        }
        received.extend_from_slice(&buf[..read]);
    }
    Some(head)
}
