//! Shared scripted HTTP server for client tests.
//!
//! A bare `TcpListener` speaking just enough HTTP/1.1 to serve one scripted
//! outcome per connection, capturing the request line, headers, and body.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub enum MockOutcome {
    DropConnection,
    Respond {
        status: u16,
        body: String,
        delay_ms: u64,
    },
}

pub fn token_body(access_token: &str, expires_in: i64, refresh_token: Option<&str>) -> String {
    match refresh_token {
        Some(rt) => format!(
            r#"{{"access_token":"{}","expires_in":{},"refresh_token":"{}"}}"#,
            access_token, expires_in, rt
        ),
        None => format!(
            r#"{{"access_token":"{}","expires_in":{}}}"#,
            access_token, expires_in
        ),
    }
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if header_end_offset(&buffer).is_some() {
            break;
        }
    }

    let header_end = header_end_offset(&buffer)?;
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?.to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Error",
    }
}

async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Start a scripted server; each accepted connection consumes the next
/// outcome (unexpected extra requests get a 500).
pub async fn start_mock_server(
    outcomes: Vec<MockOutcome>,
) -> (
    String,
    Arc<TokioMutex<Vec<CapturedRequest>>>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
    let scripted = Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
    let captured_clone = Arc::clone(&captured);
    let scripted_clone = Arc::clone(&scripted);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let captured_inner = Arc::clone(&captured_clone);
            let scripted_inner = Arc::clone(&scripted_clone);
            tokio::spawn(async move {
                let Some(request) = read_http_request(&mut stream).await else {
                    return;
                };
                captured_inner.lock().await.push(request);

                let outcome =
                    scripted_inner
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or(MockOutcome::Respond {
                            status: 500,
                            body: r#"{"error":"server_error","error_description":"unexpected request"}"#
                                .to_string(),
                            delay_ms: 0,
                        });

                match outcome {
                    MockOutcome::DropConnection => {}
                    MockOutcome::Respond {
                        status,
                        body,
                        delay_ms,
                    } => {
                        if delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        }
                        let _ = write_http_response(&mut stream, status, &body).await;
                    }
                }
            });
        }
    });

    (format!("http://{}", addr), captured, handle)
}

/// In-memory secret store for tests.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: std::sync::Mutex<HashMap<String, String>>,
}

impl mirrorkit_core::SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> mirrorkit_core::Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> mirrorkit_core::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> mirrorkit_core::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.remove(key);
        Ok(())
    }
}

impl MemorySecretStore {
    pub fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).cloned()
    }
}
