use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use std::sync::LazyLock;

pub static GATE_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "brainwin_gate_rejections_total",
        "Requests rejected by the request gate",
        &["reason"]
    )
    .unwrap()
});

pub static REGISTRATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "brainwin_registrations_total",
        "Account registrations",
        &["result"]
    )
    .unwrap()
});

pub static SAGA_COMPENSATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "brainwin_saga_compensations_total",
        "Provisioning saga compensations, by the step that was undone",
        &["step"]
    )
    .unwrap()
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "brainwin_settlements_total",
        "Checkout session settlements",
        &["result"]
    )
    .unwrap()
});

pub static WEBHOOK_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "brainwin_webhook_events_total",
        "Payment provider webhook events",
        &["type"]
    )
    .unwrap()
});

/// Force registration so every series is exported from the first scrape.
pub fn register_metrics() {
    LazyLock::force(&GATE_REJECTIONS);
    LazyLock::force(&REGISTRATIONS);
    LazyLock::force(&SAGA_COMPENSATIONS);
    LazyLock::force(&SETTLEMENTS);
    LazyLock::force(&WEBHOOK_EVENTS);
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
