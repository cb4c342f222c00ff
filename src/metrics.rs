use std::time::Instant;

use prometheus::{
    core::Collector, opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Registry, TextEncoder,
};

use crate::backend::BackendTag;

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    requests: IntCounterVec,
    head_latency: HistogramVec,
    inflight: IntGauge,
    backend_errors: IntCounterVec,
    responses: IntCounterVec,
}

// Holds one in-flight slot until dropped; `finish` records the outcome.
pub struct RequestTimer<'a> {
    metrics: &'a AppMetrics,
    route: &'static str,
    streamed: bool,
    started: Instant,
}

fn register<M>(registry: &Registry, metric: M) -> prometheus::Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl AppMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = register(
            &registry,
            IntCounterVec::new(
                opts!("relay_http_requests_total", "Requests answered by the relay"),
                &["route", "status", "streamed"],
            )?,
        )?;
        let head_latency = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "relay_response_head_seconds",
                    "Time until the response head was ready",
                )
                .buckets(vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 300.0]),
                &["route", "streamed"],
            )?,
        )?;
        let inflight = register(
            &registry,
            IntGauge::new("relay_inflight_requests", "Requests currently being prepared")?,
        )?;
        let backend_errors = register(
            &registry,
            IntCounterVec::new(
                opts!("relay_backend_errors_total", "Live backend failures by stage"),
                &["stage"],
            )?,
        )?;
        let responses = register(
            &registry,
            IntCounterVec::new(
                opts!("relay_responses_total", "Successful responses by producing backend"),
                &["backend", "streamed"],
            )?,
        )?;

        Ok(Self {
            registry,
            requests,
            head_latency,
            inflight,
            backend_errors,
            responses,
        })
    }

    pub fn start_request(&self, route: &'static str, streamed: bool) -> RequestTimer<'_> {
        self.inflight.inc();
        RequestTimer {
            metrics: self,
            route,
            streamed,
            started: Instant::now(),
        }
    }

    pub fn observe_backend_error(&self, stage: &str) {
        self.backend_errors.with_label_values(&[stage]).inc();
    }

    pub fn observe_response(&self, backend: BackendTag, streamed: bool) {
        self.responses
            .with_label_values(&[backend.as_str(), bool_label(streamed)])
            .inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl RequestTimer<'_> {
    pub fn finish(self, status: u16) {
        let streamed = bool_label(self.streamed);
        self.metrics
            .requests
            .with_label_values(&[self.route, &status.to_string(), streamed])
            .inc();
        self.metrics
            .head_latency
            .with_label_values(&[self.route, streamed])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

impl Drop for RequestTimer<'_> {
    fn drop(&mut self) {
        self.metrics.inflight.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_requests_are_counted_by_route_and_status() {
        let metrics = AppMetrics::new().expect("metrics register");
        metrics.start_request("/generate", false).finish(200);
        metrics.start_request("/stream", true).finish(503);
        metrics.observe_response(BackendTag::Stub, false);
        metrics.observe_backend_error("stream_start");

        assert_eq!(
            metrics
                .requests
                .with_label_values(&["/stream", "503", "true"])
                .get(),
            1
        );
        let body = metrics.render().expect("metrics render");
        assert!(body.contains(r#"relay_http_requests_total{route="/generate",status="200",streamed="false"} 1"#));
        assert!(body.contains("relay_response_head_seconds_bucket"));
        assert!(body.contains(r#"backend="stub""#));
        assert!(body.contains(r#"stage="stream_start""#));
    }

    #[test]
    fn timer_releases_inflight_slot_even_when_unfinished() {
        let metrics = AppMetrics::new().expect("metrics register");
        let finished = metrics.start_request("/generate", false);
        let abandoned = metrics.start_request("/stream", true);
        assert_eq!(metrics.inflight.get(), 2);

        finished.finish(200);
        drop(abandoned);

        assert_eq!(metrics.inflight.get(), 0);
        assert_eq!(
            metrics
                .requests
                .with_label_values(&["/stream", "200", "true"])
                .get(),
            0
        );
    }

    #[test]
    fn separate_instances_use_separate_registries() {
        let first = AppMetrics::new().expect("first registers");
        let second = AppMetrics::new().expect("second registers");
        first.start_request("/generate", false).finish(200);

        let body = second.render().expect("metrics render");
        assert!(!body.contains(r#"route="/generate""#));
    }
}
