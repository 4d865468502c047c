use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::connection::ConnectionState;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static FRAMES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "pier_frames_received_total",
            "Inbound frames that carried a type discriminator",
        ),
        &["type"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FRAMES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "pier_frames_dropped_total",
            "Inbound frames discarded because they could not be decoded",
        ),
        &["reason"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FRAMES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("pier_frames_sent_total", "Outbound frames handed to the transport"),
        &["type"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RECONNECTS_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "pier_reconnects_scheduled_total",
        "Automatic reconnect attempts scheduled",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static CONNECTION_STATE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "pier_connection_state",
        "0 = disconnected, 1 = connecting, 2 = connected",
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn record_frame_received(kind: &str) {
    FRAMES_RECEIVED.with_label_values(&[kind]).inc();
}

pub fn record_frame_dropped(reason: &str) {
    FRAMES_DROPPED.with_label_values(&[reason]).inc();
}

pub fn record_frame_sent(kind: &str) {
    FRAMES_SENT.with_label_values(&[kind]).inc();
}

pub fn record_reconnect_scheduled() {
    RECONNECTS_SCHEDULED.inc();
}

pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
    };
    CONNECTION_STATE.set(value);
}

/// Prometheus text exposition of every metric in [`REGISTRY`].
pub fn render() -> String {
    Lazy::force(&FRAMES_RECEIVED);
    Lazy::force(&FRAMES_DROPPED);
    Lazy::force(&FRAMES_SENT);
    Lazy::force(&RECONNECTS_SCHEDULED);
    Lazy::force(&CONNECTION_STATE);

    let mut buffer = Vec::new();
    if TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_registered_metrics() {
        record_frame_received("chat");
        record_frame_dropped("json");
        let text = render();
        assert!(text.contains("pier_frames_received_total{type=\"chat\"}"));
        assert!(text.contains("pier_frames_dropped_total{reason=\"json\"}"));
        assert!(text.contains("pier_connection_state"));
        assert!(text.contains("pier_reconnects_scheduled_total"));
    }
}
