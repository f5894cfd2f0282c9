//! Prometheus text exposition format.
//!
//! Renders a [`MetricsSnapshot`] for scraping by a Prometheus server or
//! compatible agent. Dotted Keel names become underscore-separated and are
//! prefixed with `keel_`.

use std::fmt::Write;

use crate::registry::MetricsSnapshot;

/// Render a metrics snapshot into Prometheus text format.
///
/// Counters and gauges map one-to-one. Histograms are exposed as a
/// quantile-less summary (`_count`, `_sum`) plus `_min` / `_max` gauges.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    for (name, value) in &snapshot.counters {
        let metric = metric_name(name);
        let _ = writeln!(out, "# TYPE {metric} counter");
        let _ = writeln!(out, "{metric} {value}");
    }

    for (name, value) in &snapshot.gauges {
        let metric = metric_name(name);
        let _ = writeln!(out, "# TYPE {metric} gauge");
        let _ = writeln!(out, "{metric} {value}");
    }

    for (name, h) in &snapshot.histograms {
        let metric = metric_name(name);
        let _ = writeln!(out, "# TYPE {metric} summary");
        let _ = writeln!(out, "{metric}_sum {}", h.sum);
        let _ = writeln!(out, "{metric}_count {}", h.count);
        if let (Some(min), Some(max)) = (h.min, h.max) {
            let _ = writeln!(out, "# TYPE {metric}_min gauge");
            let _ = writeln!(out, "{metric}_min {min}");
            let _ = writeln!(out, "# TYPE {metric}_max gauge");
            let _ = writeln!(out, "{metric}_max {max}");
        }
    }

    out
}

/// `circuit_breaker.state.payments-api` → `keel_circuit_breaker_state_payments_api`.
fn metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 5);
    out.push_str("keel_");
    out.extend(
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
    );
    out
}
