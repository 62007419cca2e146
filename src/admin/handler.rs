// src/admin/handler.rs
use crate::metrics::MetricsRegistry;
use crate::topology::{Topology, TopologyPhase};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

/// Serves `/metrics`, `/topology` and `/health` for one topology.
#[derive(Clone)]
pub struct AdminHandler {
    topology: Topology,
    registry: Option<Arc<MetricsRegistry>>,
}

impl AdminHandler {
    pub fn new(topology: Topology, registry: Option<Arc<MetricsRegistry>>) -> Self {
        Self { topology, registry }
    }

    fn route(&self, req: &Request<Body>) -> Response<Body> {
        if req.method() != Method::GET {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        match req.uri().path() {
            "/metrics" => match &self.registry {
                Some(registry) => Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4")
                    .body(Body::from(registry.gather()))
                    .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "")),
                None => plain(StatusCode::NOT_FOUND, "Metrics disabled"),
            },
            "/topology" => self.topology_json(),
            "/health" => {
                if self.topology.phase() == TopologyPhase::Connected && self.topology.state().any_up() {
                    plain(StatusCode::OK, "OK")
                } else {
                    plain(StatusCode::SERVICE_UNAVAILABLE, "No proxy available")
                }
            }
            _ => plain(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn topology_json(&self) -> Response<Body> {
        let eligible: HashSet<_> = self
            .topology
            .eligible()
            .into_iter()
            .map(|proxy| proxy.endpoint().clone())
            .collect();

        let proxies: Vec<_> = self
            .topology
            .snapshot()
            .into_iter()
            .map(|proxy| {
                let record = &proxy.record;
                json!({
                    "endpoint": record.endpoint,
                    "status": record.status,
                    "rtt_ms": record.last_rtt_ms(),
                    "last_seen_at": record.last_seen_at,
                    "consecutive_failures": record.consecutive_failures,
                    "eligible": eligible.contains(&record.endpoint),
                    "last_error": record.last_error,
                    "capabilities": record.capabilities,
                })
            })
            .collect();

        let body = json!({
            "readiness": self.topology.readiness(),
            "proxies": proxies,
        });

        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, ""))
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

impl Service<Request<Body>> for AdminHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let response = self.route(&req);
        Box::pin(async move { Ok(response) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopologyConfig;
    use crate::topology::ProxyEndpoint;
    use crate::transport::TcpConnector;
    use tower::ServiceExt;

    fn handler(with_metrics: bool) -> AdminHandler {
        let registry = with_metrics.then(|| Arc::new(MetricsRegistry::new().unwrap()));
        let config = TopologyConfig::new(vec![
            ProxyEndpoint::new("localhost", 52000),
            ProxyEndpoint::new("localhost", 52001),
        ]);
        let topology = Topology::with_metrics(
            config,
            Arc::new(TcpConnector::new()),
            registry.as_ref().map(|r| r.collector()),
        )
        .unwrap();
        AdminHandler::new(topology, registry)
    }

    async fn get(handler: AdminHandler, path: &str) -> (StatusCode, String) {
        let request = Request::get(path).body(Body::empty()).unwrap();
        let response = handler.oneshot(request).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_topology_lists_every_seed() {
        let (status, body) = get(handler(false), "/topology").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["readiness"]["phase"], "disconnected");
        assert_eq!(value["proxies"].as_array().unwrap().len(), 2);
        assert_eq!(value["proxies"][0]["endpoint"], "localhost:52000");
        assert_eq!(value["proxies"][0]["status"], "connecting");
        assert_eq!(value["proxies"][0]["eligible"], false);
    }

    #[tokio::test]
    async fn test_health_unavailable_before_connect() {
        let (status, _) = get(handler(false), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (status, body) = get(handler(true), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("topology_total_proxies 2"));

        let (status, _) = get(handler(false), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (status, _) = get(handler(false), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
