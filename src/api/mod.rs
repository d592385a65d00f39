use crate::storage::StatePublisher;
use crate::Timestamp;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const MAX_HISTORY_LIMIT: usize = 10_000;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// History rows returned by `/history` and `/stats` when no limit is given.
    pub history_window: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8750".to_string(),
            history_window: crate::DEFAULT_HISTORY_WINDOW,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Read-only JSON view over a state publisher.
pub struct ApiServer {
    cfg: ApiConfig,
    publisher: Arc<dyn StatePublisher>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, publisher: Arc<dyn StatePublisher>) -> Self {
        Self { cfg, publisher }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("snapshot api listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("snapshot-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &self, shutdown_thread) {
                    log::error!("snapshot api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, server: &ApiServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server) {
                    log::warn!("snapshot api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    let publisher = server.publisher.as_ref();
    let result = match request.path.as_str() {
        "/health" => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
            return Ok(());
        }
        "/stats" => match request.limit(server.cfg.history_window) {
            Ok(limit) => publisher.read_view(limit).and_then(|v| to_json(&v)),
            Err(err) => return bad_request(&mut stream, &err.to_string()),
        },
        "/history" => match request.limit(server.cfg.history_window) {
            Ok(limit) => publisher.recent_history(limit).and_then(|h| to_json(&h)),
            Err(err) => return bad_request(&mut stream, &err.to_string()),
        },
        "/summaries" => publisher.summaries().and_then(|s| to_json(&s)),
        "/summary" => {
            let timestamp = match request.query.get("timestamp") {
                Some(raw) => match raw.parse::<Timestamp>() {
                    Ok(ts) => ts,
                    Err(_) => return bad_request(&mut stream, "invalid_timestamp"),
                },
                None => return bad_request(&mut stream, "missing_timestamp"),
            };
            match publisher.summary_at(&timestamp) {
                Ok(Some(summary)) => to_json(&summary),
                Ok(None) => {
                    write_json_response(&mut stream, 404, r#"{"error":"no_summary"}"#)?;
                    return Ok(());
                }
                Err(err) => Err(err),
            }
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };

    match result {
        Ok(payload) => write_response(&mut stream, 200, "application/json", &payload),
        Err(err) => {
            log::warn!("snapshot api read failed for {}: {:#}", request.path, err);
            write_json_response(&mut stream, 500, r#"{"error":"store_unavailable"}"#)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn bad_request(stream: &mut TcpStream, reason: &str) -> Result<()> {
    let body = serde_json::json!({ "error": reason }).to_string();
    write_json_response(stream, 400, &body)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    Err(_) => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

impl HttpRequest {
    fn limit(&self, default: usize) -> Result<usize> {
        match self.query.get("limit") {
            Some(raw) => {
                let limit: usize = raw.parse().map_err(|_| anyhow!("invalid_limit"))?;
                Ok(limit.min(MAX_HISTORY_LIMIT))
            }
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_percent_decoded() {
        let query = parse_query("timestamp=2025-05-01%2010:11:12&limit=5&flag");
        assert_eq!(query["timestamp"], "2025-05-01 10:11:12");
        assert_eq!(query["limit"], "5");
        assert_eq!(query["flag"], "");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn limit_defaults_and_caps() {
        let mut request = HttpRequest {
            method: "GET".to_string(),
            path: "/history".to_string(),
            query: HashMap::new(),
        };
        assert_eq!(request.limit(100).unwrap(), 100);
        request
            .query
            .insert("limit".to_string(), "999999".to_string());
        assert_eq!(request.limit(100).unwrap(), MAX_HISTORY_LIMIT);
        request.query.insert("limit".to_string(), "ten".to_string());
        assert!(request.limit(100).is_err());
    }
}
