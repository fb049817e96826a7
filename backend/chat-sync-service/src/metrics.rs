use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static FANOUT_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_fanout_events_total",
            "Fan-out publishes by event type and outcome",
        ),
        &["event", "outcome"],
    )
    .expect("failed to create chat_fanout_events_total");
    if let Err(e) = prometheus::default_registry().register(Box::new(counter.clone())) {
        tracing::warn!(error = %e, "chat_fanout_events_total not registered");
    }
    counter
});

pub fn record_fanout(event: &str, outcome: &str) {
    FANOUT_EVENTS_TOTAL
        .with_label_values(&[event, outcome])
        .inc();
}

/// Current counter value; used by tests to observe fan-out side effects
pub fn fanout_count(event: &str, outcome: &str) -> u64 {
    FANOUT_EVENTS_TOTAL
        .with_label_values(&[event, outcome])
        .get()
}

pub async fn metrics_handler() -> HttpResponse {
    Lazy::force(&FANOUT_EVENTS_TOTAL);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
