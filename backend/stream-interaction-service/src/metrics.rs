use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

static INBOUND_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "stream_interaction_inbound_events_total",
            "Inbound audience events handled, by event type",
        ),
        &["type"],
    )
    .expect("failed to create stream_interaction_inbound_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_interaction_inbound_events_total");
    counter
});

static MODERATION_ACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "stream_interaction_moderation_actions_total",
            "Moderation actions executed, by action type and origin",
        ),
        &["action", "origin"],
    )
    .expect("failed to create stream_interaction_moderation_actions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_interaction_moderation_actions_total");
    counter
});

static REVENUE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "stream_interaction_revenue_total",
            "Recorded revenue, by paid event kind",
        ),
        &["kind"],
    )
    .expect("failed to create stream_interaction_revenue_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_interaction_revenue_total");
    counter
});

static PAYMENT_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "stream_interaction_payment_failures_total",
        "Payment authorizations that were declined or timed out",
    )
    .expect("failed to create stream_interaction_payment_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_interaction_payment_failures_total");
    counter
});

static BACKPRESSURE_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "stream_interaction_backpressure_rejections_total",
        "Submissions rejected because a session queue was full",
    )
    .expect("failed to create stream_interaction_backpressure_rejections_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_interaction_backpressure_rejections_total");
    counter
});

pub fn record_inbound_event(event_type: &str) {
    INBOUND_EVENTS_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_moderation_action(action: &str, automatic: bool) {
    let origin = if automatic { "auto" } else { "manual" };
    MODERATION_ACTIONS_TOTAL
        .with_label_values(&[action, origin])
        .inc();
}

pub fn record_revenue(kind: &str, amount: f64) {
    if amount > 0.0 {
        REVENUE_TOTAL.with_label_values(&[kind]).inc_by(amount);
    }
}

pub fn record_payment_failure() {
    PAYMENT_FAILURES_TOTAL.inc();
}

pub fn record_backpressure() {
    BACKPRESSURE_REJECTIONS_TOTAL.inc();
}

/// Text exposition of everything on the default registry
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
