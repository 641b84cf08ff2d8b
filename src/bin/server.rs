//! HTTP server for the analyst service
//! Simple HTTP server using tokio and basic HTTP handling

use flux_analyst::{AnalystRequest, AnalystService, AppConfig, AuditSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1 << 20;
const DEFAULT_HISTORY_LIMIT: usize = 50;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let service = Arc::new(flux_analyst::build_service(&config)?);

    let listener = TcpListener::bind(&config.server_addr).await?;
    info!("Server listening on http://{}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&service)));
    }
}

async fn handle_connection(mut stream: TcpStream, service: Arc<AnalystService>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
    };

    let response = handle_request(&request, &service).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Read headers, then as much body as `Content-Length` announces.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut data: Vec<u8> = Vec::new();
    let mut buffer = [0; 4096];

    loop {
        let size = stream.read(&mut buffer).await?;
        if size == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..size]);

        if let Some(header_end) = find_header_end(&data) {
            let headers = String::from_utf8_lossy(&data[..header_end]);
            let body_len = content_length(&headers);
            if data.len() >= header_end + 4 + body_len {
                break;
            }
        }
        if data.len() > MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn handle_request(request: &str, service: &AnalystService) -> String {
    let request_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", r#"{"error":"Malformed request line"}"#);
    }

    let method = parts[0];
    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (parts[1], HashMap::new()),
    };
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    info!("Request: {} {}", method, path);

    match (method, path) {
        ("GET", "/api/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"flux-analyst"}"#)
        }
        ("POST", "/api/query") => {
            let body = request
                .find("\r\n\r\n")
                .map(|idx| request[idx + 4..].trim())
                .unwrap_or("");
            let analyst_request: AnalystRequest = match serde_json::from_str(body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let message = serde_json::json!({ "error": format!("Invalid request body: {}", e) });
                    return create_response(400, "Bad Request", &message.to_string());
                }
            };
            let response = service.handle(analyst_request).await;
            json_response(&response)
        }
        ("GET", "/api/history") => {
            let limit = query
                .get("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HISTORY_LIMIT);
            json_response(&service.audit().recent(limit))
        }
        ("GET", "/api/history/search") => match query.get("q").filter(|q| !q.is_empty()) {
            Some(term) => json_response(&service.audit().search(term)),
            None => create_response(400, "Bad Request", r#"{"error":"Search term is required"}"#),
        },
        ("GET", "/api/stats") => json_response(&service.statistics()),
        ("OPTIONS", _) => create_response(200, "OK", "{}"),
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(200, "OK", &body),
        Err(_) => create_response(500, "Internal Server Error", r#"{"error":"Failed to serialize response"}"#),
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
