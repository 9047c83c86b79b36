//! Prometheus text exposition rendered from the component counters.

use crate::state::AppState;
use std::fmt::Write;
use std::sync::atomic::Ordering;

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} gauge", name);
    let _ = writeln!(out, "{} {}", name, value);
}

/// Render all core counters in Prometheus text format.
pub fn render(state: &AppState) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "rice_up",
        "Whether the process is serving",
        u64::from(state.is_ready()),
    );
    gauge(
        &mut out,
        "rice_in_flight_requests",
        "HTTP requests currently in flight",
        state.in_flight(),
    );
    gauge(
        &mut out,
        "rice_uptime_seconds",
        "Seconds since process start",
        state.uptime().as_secs(),
    );

    let search = state.search.metrics();
    counter(
        &mut out,
        "rice_searches_total",
        "Search requests processed",
        search.searches.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_search_failures_total",
        "Search requests that returned an error",
        search.failures.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_reranks_applied_total",
        "Searches where reranking was applied",
        search.reranks_applied.load(Ordering::Relaxed),
    );

    let index = state.pipeline.metrics();
    counter(
        &mut out,
        "rice_files_indexed_total",
        "Files indexed",
        index.files_indexed.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_files_skipped_total",
        "Files skipped with unchanged content",
        index.files_skipped.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_files_failed_total",
        "Files that failed indexing",
        index.files_failed.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_chunks_created_total",
        "Chunks created by the indexing pipeline",
        index.chunks_created.load(Ordering::Relaxed),
    );

    let ml = state.ml.metrics();
    counter(
        &mut out,
        "rice_ml_embed_requests_total",
        "Embedding batches served",
        ml.embed_requests.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_ml_sparse_requests_total",
        "Sparse encoding batches served",
        ml.sparse_requests.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_ml_rerank_requests_total",
        "Rerank batches served",
        ml.rerank_requests.load(Ordering::Relaxed),
    );

    let bus = state.bus_metrics();
    counter(
        &mut out,
        "rice_bus_published_total",
        "Events published to the bus",
        bus.published.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_bus_request_timeouts_total",
        "Bus requests that timed out",
        bus.request_timeouts.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "rice_bus_backpressure_total",
        "Publishes rejected by backpressure",
        bus.backpressure_failures.load(Ordering::Relaxed),
    );

    out
}
