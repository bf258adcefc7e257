use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub slot_conflicts_total: IntCounter,
    pub transitions_total: IntCounterVec,
    pub proposal_latency_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignment commits by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let slot_conflicts_total = IntCounter::new(
            "slot_conflicts_total",
            "Commits rejected because the slot was taken concurrently",
        )
        .expect("valid slot_conflicts_total metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Order status transitions by target"),
            &["status"],
        )
        .expect("valid transitions_total metric");

        let proposal_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "proposal_latency_seconds",
            "Latency of candidate proposal in seconds",
        ))
        .expect("valid proposal_latency_seconds metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(slot_conflicts_total.clone()))
            .expect("register slot_conflicts_total");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(proposal_latency_seconds.clone()))
            .expect("register proposal_latency_seconds");

        Self {
            registry,
            assignments_total,
            slot_conflicts_total,
            transitions_total,
            proposal_latency_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
