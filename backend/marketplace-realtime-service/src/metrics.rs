use std::rc::Rc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    web, Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
};

use crate::state::AppState;

/// Route pattern of the WebSocket upgrade endpoint
const UPGRADE_ROUTE: &str = "/ws";

fn register<C>(collector: C, name: &str) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    collector
}

static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "marketplace_realtime_live_connections",
        "WebSocket connections currently held in the registry",
    )
    .expect("failed to create marketplace_realtime_live_connections");
    register(gauge, "marketplace_realtime_live_connections")
});

static MESSAGES_ROUTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_realtime_messages_routed_total",
            "Inbound chat messages by routing outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create marketplace_realtime_messages_routed_total");
    register(counter, "marketplace_realtime_messages_routed_total")
});

static RECOMPUTES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_realtime_recomputes_total",
            "Recommendation recompute cycles by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create marketplace_realtime_recomputes_total");
    register(counter, "marketplace_realtime_recomputes_total")
});

static PRESENCE_TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_realtime_presence_ticks_total",
            "Presence scheduler ticks by result",
        ),
        &["result"],
    )
    .expect("failed to create marketplace_realtime_presence_ticks_total");
    register(counter, "marketplace_realtime_presence_ticks_total")
});

static PRESENCE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "marketplace_realtime_presence_jobs",
        "Customers with a running presence job",
    )
    .expect("failed to create marketplace_realtime_presence_jobs");
    register(gauge, "marketplace_realtime_presence_jobs")
});

static WS_UPGRADES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_realtime_ws_upgrades_total",
            "WebSocket upgrade attempts by result",
        ),
        &["result"],
    )
    .expect("failed to create marketplace_realtime_ws_upgrades_total");
    register(counter, "marketplace_realtime_ws_upgrades_total")
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "marketplace_realtime_http_requests_total",
            "Presence and recommendation API requests",
        ),
        &["method", "route", "status"],
    )
    .expect("failed to create marketplace_realtime_http_requests_total");
    register(counter, "marketplace_realtime_http_requests_total")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "marketplace_realtime_http_request_duration_seconds",
            "Latency of presence and recommendation API requests",
        )
        // A refresh runs a full recompute, including embedding calls.
        .buckets(vec![0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "route"],
    )
    .expect("failed to create marketplace_realtime_http_request_duration_seconds");
    register(histogram, "marketplace_realtime_http_request_duration_seconds")
});

pub fn set_live_connections(count: usize) {
    LIVE_CONNECTIONS.set(count as i64);
}

/// `outcome`: delivered, offline, rejected or failed
pub fn record_message(outcome: &str) {
    MESSAGES_ROUTED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_recompute(outcome: &str) {
    RECOMPUTES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_presence_tick(result: &str) {
    PRESENCE_TICKS_TOTAL.with_label_values(&[result]).inc();
}

/// Only `101 Switching Protocols` counts as an accepted upgrade
pub fn record_upgrade(status: StatusCode) {
    let result = if status == StatusCode::SWITCHING_PROTOCOLS {
        "accepted"
    } else {
        "rejected"
    };
    WS_UPGRADES_TOTAL.with_label_values(&[result]).inc();
}

fn observe_api_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, route, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route])
        .observe(elapsed.as_secs_f64());
}

/// Prometheus exposition. Registry and scheduler gauges are sampled from
/// live state at scrape time.
pub async fn serve_metrics(state: web::Data<AppState>) -> HttpResponse {
    set_live_connections(state.registry.connection_count().await);
    PRESENCE_JOBS.set(state.scheduler.active_jobs().await as i64);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Counts WebSocket upgrades by result and times every other routed request.
///
/// Labels use the route pattern, so user ids in paths never reach the
/// label set. Unmatched paths are not recorded.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let route = req.match_pattern();
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => e.as_response_error().status_code(),
            };
            match route.as_deref() {
                Some(UPGRADE_ROUTE) => record_upgrade(status),
                Some(route) => observe_api_request(&method, route, status, start.elapsed()),
                None => {}
            }
            result
        })
    }
}
