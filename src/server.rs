use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::health::HealthChecker;
use crate::prometheus_metrics::PrometheusMetrics;

pub struct HealthServer {
    health_checker: Arc<HealthChecker>,
    prometheus: Arc<PrometheusMetrics>,
    port: u16,
}

impl HealthServer {
    pub fn new(health_checker: Arc<HealthChecker>, port: u16) -> Self {
        Self {
            health_checker,
            prometheus: Arc::new(PrometheusMetrics::new()),
            port,
        }
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        info!(port = self.port, "health server listening");

        loop {
            let (mut socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            let health_checker = Arc::clone(&self.health_checker);
            let prometheus = Arc::clone(&self.prometheus);

            tokio::spawn(async move {
                let mut buffer = [0; 1024];
                let n = match socket.read(&mut buffer).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };

                let request = String::from_utf8_lossy(&buffer[..n]);
                let response = Self::handle_request(&request, &health_checker, &prometheus);
                if let Err(e) = socket.write_all(response.as_bytes()).await {
                    debug!(%peer, error = %e, "failed to write health response");
                }
            });
        }
    }

    fn handle_request(
        request: &str,
        health_checker: &HealthChecker,
        prometheus: &PrometheusMetrics,
    ) -> String {
        let Some(request_line) = request.lines().next() else {
            return Self::error_response(400, "Bad Request");
        };
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Self::error_response(400, "Bad Request");
        }

        match (parts[0], parts[1]) {
            ("GET", "/health") => match serde_json::to_string(&health_checker.get_health()) {
                Ok(json) => Self::response(200, "application/json", &json),
                Err(_) => Self::error_response(500, "Internal Server Error"),
            },
            ("GET", "/status") => {
                match serde_json::to_string(&health_checker.get_detailed_status()) {
                    Ok(json) => Self::response(200, "application/json", &json),
                    Err(_) => Self::error_response(500, "Internal Server Error"),
                }
            }
            ("GET", "/metrics") => {
                prometheus.update_from_metrics(&health_checker.metrics().get_metrics());
                match prometheus.export_metrics() {
                    Ok(text) => Self::response(
                        200,
                        "application/openmetrics-text; version=1.0.0; charset=utf-8",
                        &text,
                    ),
                    Err(_) => Self::error_response(500, "Internal Server Error"),
                }
            }
            _ => Self::error_response(404, "Not Found"),
        }
    }

    fn response(status: u16, content_type: &str, body: &str) -> String {
        let reason = match status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            _ => "Internal Server Error",
        };
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            status,
            reason,
            content_type,
            body.len(),
            body
        )
    }

    fn error_response(status: u16, message: &str) -> String {
        let body = format!("{{\"error\": \"{}\"}}", message);
        Self::response(status, "application/json", &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MetricsCollector;

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(MetricsCollector::new()), Config::default())
    }

    fn get(path: &str, checker: &HealthChecker, prometheus: &PrometheusMetrics) -> String {
        let request = format!("GET {path} HTTP/1.1\r\n\r\n");
        HealthServer::handle_request(&request, checker, prometheus)
    }

    #[test]
    fn routes_health_and_metrics() {
        let checker = checker();
        let prometheus = PrometheusMetrics::new();

        let health = get("/health", &checker, &prometheus);
        assert!(health.starts_with("HTTP/1.1 200 OK"));
        assert!(health.contains("\"status\":\"healthy\""));

        let metrics = get("/metrics", &checker, &prometheus);
        assert!(metrics.contains("grindstone_uptime_seconds"));
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let checker = checker();
        let prometheus = PrometheusMetrics::new();
        let response = get("/nope", &checker, &prometheus);
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        let empty = HealthServer::handle_request("", &checker, &prometheus);
        assert!(empty.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn serves_until_cancelled() {
        let server = HealthServer::new(Arc::new(checker()), 0);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        server.start(shutdown).await.unwrap();
    }
}
