use crate::credentials::CallOutcome;
use tracing::trace;

// Counters are emitted as trace events; the Prometheus exporter only serves
// the render endpoint.

pub fn inc_requests(route: &'static str) {
    trace!(target = "scout.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "scout.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn credential_outcome(outcome: CallOutcome) {
    let outcome = match outcome {
        CallOutcome::Success => "success",
        CallOutcome::RateLimited => "rate_limited",
        CallOutcome::AuthError => "auth_error",
        CallOutcome::Failure => "failure",
    };
    trace!(
        target = "scout.metrics",
        outcome = outcome,
        "credential_calls_total_inc"
    );
}

pub fn cycle_finished(state: &'static str, fetched: usize, persisted: usize) {
    trace!(
        target = "scout.metrics",
        state = state,
        fetched = fetched as u64,
        persisted = persisted as u64,
        "cycles_total_inc"
    );
}
