//! Prometheus metrics HTTP server.
//!
//! Serves metrics plus a read-only view of the backend registry.

use crate::backend::BackendRegistry;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Address to bind.
    address: SocketAddr,
    /// Path for metrics endpoint.
    path: String,
    /// Metrics collector.
    collector: MetricsCollector,
    /// Registry listed under `/backends`.
    registry: Arc<BackendRegistry>,
}

struct Endpoints {
    path: String,
    collector: MetricsCollector,
    registry: Arc<BackendRegistry>,
}

impl MetricsServer {
    /// Create a new metrics server.
    pub fn new(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
        registry: Arc<BackendRegistry>,
    ) -> Self {
        Self {
            address,
            path,
            collector,
            registry,
        }
    }

    /// Run the metrics server until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(self.address).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, address = %self.address, "failed to bind metrics server");
                return;
            }
        };

        info!(address = %self.address, path = %self.path, "metrics server started");

        let endpoints = Arc::new(Endpoints {
            path: self.path,
            collector: self.collector,
            registry: self.registry,
        });

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let endpoints = Arc::clone(&endpoints);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                                    let endpoints = Arc::clone(&endpoints);
                                    async move {
                                        Ok::<_, Infallible>(endpoints.respond(req.method(), req.uri().path()))
                                    }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

impl Endpoints {
    fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        debug!(path = %path, method = %method, "metrics request");

        if method != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n".to_string());
        }

        if path == self.path {
            match self.collector.encode() {
                Ok(buffer) => {
                    let mut response = text(StatusCode::OK, buffer);
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
                    response
                }
                Err(e) => {
                    error!(error = %e, "failed to encode metrics");
                    text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to encode metrics\n".to_string(),
                    )
                }
            }
        } else if path == "/health" || path == "/healthz" {
            text(StatusCode::OK, "OK\n".to_string())
        } else if path == "/backends" {
            match serde_yaml::to_string(&self.registry.snapshot()) {
                Ok(body) => text(StatusCode::OK, body),
                Err(e) => {
                    error!(error = %e, "failed to encode backend list");
                    text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to encode backends\n".to_string(),
                    )
                }
            }
        } else if path == "/" {
            let body = format!(
                "sqlgate metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /backends - Registered backends\n  /health - Health check\n",
                self.path
            );
            text(StatusCode::OK, body)
        } else {
            text(StatusCode::NOT_FOUND, "Not found\n".to_string())
        }
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRole;
    use http_body_util::BodyExt;

    fn endpoints() -> Endpoints {
        let collector = MetricsCollector::new();
        let registry = BackendRegistry::new(1).with_metrics(collector.clone());
        registry.add("10.0.0.1:3306", BackendRole::ReadWrite).unwrap();
        registry.add("10.0.0.2:3306@4", BackendRole::ReadOnly).unwrap();

        Endpoints {
            path: "/metrics".to_string(),
            collector,
            registry: Arc::new(registry),
        }
    }

    async fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_metrics_server_new() {
        let collector = MetricsCollector::new();
        let server = MetricsServer::new(
            "127.0.0.1:9090".parse().unwrap(),
            "/metrics".to_string(),
            collector,
            Arc::new(BackendRegistry::new(1)),
        );
        assert_eq!(server.address, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(server.path, "/metrics");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let endpoints = endpoints();
        endpoints.registry.select().unwrap();

        let response = endpoints.respond(&Method::GET, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );

        let body = body_of(response).await;
        assert!(body.contains("sqlgate_backends"));
        assert!(body.contains("sqlgate_backend_selections"));
    }

    #[tokio::test]
    async fn test_backends_endpoint() {
        let endpoints = endpoints();

        let response = endpoints.respond(&Method::GET, "/backends");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_of(response).await;
        assert!(body.contains("10.0.0.1:3306"));
        assert!(body.contains("read_only"));
        assert!(body.contains("weight: 4"));
    }

    #[test]
    fn test_other_routes() {
        let endpoints = endpoints();
        assert_eq!(endpoints.respond(&Method::GET, "/health").status(), StatusCode::OK);
        assert_eq!(endpoints.respond(&Method::GET, "/").status(), StatusCode::OK);
        assert_eq!(
            endpoints.respond(&Method::GET, "/nope").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            endpoints.respond(&Method::POST, "/metrics").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
