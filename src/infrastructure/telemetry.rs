//! Prometheus metrics
//!
//! Recorders are no-ops until a recorder is installed, so library code calls
//! them unconditionally.

use crate::domain::registration::RegistrationState;
use crate::domain::session::{Direction, EndReason};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Once;

static DESCRIBE: Once = Once::new();

/// Install the Prometheus recorder and describe all metrics
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "webphone_calls_total",
            "Total number of sessions created, by direction"
        );
        describe_counter!(
            "webphone_control_operations_total",
            "Control operations by outcome (applied or skip reason)"
        );
        describe_counter!(
            "webphone_sessions_ended_total",
            "Sessions that reached Terminated, by end reason"
        );
        describe_counter!(
            "webphone_registrations_total",
            "Settled registration attempts"
        );
        describe_counter!(
            "webphone_messages_total",
            "Instant messages by direction and result"
        );
        describe_gauge!(
            "webphone_current_session",
            "1 while a session occupies the current slot"
        );
    });
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => "outbound",
        Direction::Inbound => "inbound",
    }
}

pub fn record_call(direction: Direction) {
    counter!("webphone_calls_total", "direction" => direction_label(direction)).increment(1);
}

pub fn record_control(operation: &'static str, outcome: &'static str) {
    counter!(
        "webphone_control_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_session_ended(reason: Option<&EndReason>) {
    let label = reason.map_or("unknown", EndReason::label);
    counter!("webphone_sessions_ended_total", "reason" => label).increment(1);
}

pub fn record_registration(state: &RegistrationState) {
    if state.is_terminal() {
        counter!("webphone_registrations_total", "result" => state.name()).increment(1);
    }
}

pub fn record_message(direction: &'static str, result: &'static str) {
    counter!(
        "webphone_messages_total",
        "direction" => direction,
        "result" => result
    )
    .increment(1);
}

pub fn set_current_session(active: bool) {
    gauge!("webphone_current_session").set(if active { 1.0 } else { 0.0 });
}
