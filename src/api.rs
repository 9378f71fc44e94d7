//! Status and metrics HTTP endpoint (§4.9).
//!
//! Deliberately minimal: two read-only `GET` routes served by hand over a raw
//! `tokio::net::TcpListener`, the same way the teacher's own client-facing
//! listener never reaches for a web framework. `api_port == 0` disables the
//! endpoint entirely.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsStore;
use crate::service::BindingService;

/// Serve `GET /status` and `GET /metrics` on `port` until `ctx` is cancelled.
/// A `port` of `0` means the endpoint is disabled; this function returns
/// immediately in that case.
pub async fn serve(port: u16, service: Arc<BindingService>, metrics: MetricsStore, ctx: CancellationToken) {
    if port == 0 {
        return;
    }
    let addr = ("0.0.0.0", port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%port, error = %err, "failed to bind status/metrics listener");
            return;
        }
    };
    tracing::info!(%port, "status/metrics endpoint listening");

    loop {
        tokio::select! {
            () = ctx.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let service = Arc::clone(&service);
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(socket, &service, &metrics).await {
                                tracing::warn!(%peer, error = %err, "status/metrics connection error");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "status/metrics accept error"),
                }
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream, service: &BindingService, metrics: &MetricsStore) -> std::io::Result<()> {
    let request_line = read_request_line(&mut socket).await?;
    let (status_line, body) = route(&request_line, service, metrics);
    let response = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

async fn read_request_line(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = socket.read(&mut byte).await?;
        if n == 0 || byte[0] == b'\n' || buf.len() > 8192 {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string())
}

fn route(request_line: &str, service: &BindingService, metrics: &MetricsStore) -> (&'static str, String) {
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    match path {
        "/status" => {
            let body = serde_json::json!({ "bindings": service.binding_names() }).to_string();
            ("HTTP/1.1 200 OK", body)
        }
        "/metrics" => {
            let body = serde_json::to_string(&metrics.snapshot()).unwrap_or_else(|_| "[]".to_string());
            ("HTTP/1.1 200 OK", body)
        }
        _ => ("HTTP/1.1 404 Not Found", "{\"error\":\"not found\"}".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_status_and_metrics_and_falls_back_to_404() {
        let service = BindingService::new();
        let metrics = MetricsStore::new();

        let (status, body) = route("GET /status HTTP/1.1", &service, &metrics);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(body.contains("bindings"));

        let (status, body) = route("GET /metrics HTTP/1.1", &service, &metrics);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, "[]");

        let (status, _) = route("GET /nope HTTP/1.1", &service, &metrics);
        assert_eq!(status, "HTTP/1.1 404 Not Found");
    }
}
