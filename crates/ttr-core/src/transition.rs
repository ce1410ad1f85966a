//! State-transition derivation from consecutive runtime rows.
//!
//! A transition is emitted between two consecutive `runtime_5m` rows for the
//! same thermostat whenever their state tuple (mode, setpoints, climate)
//! differs. The first row of a cycle has no in-memory predecessor, so a
//! restart produces a first-row gap rather than a fabricated transition.

use chrono::{DateTime, Utc};

use crate::model::{Runtime5m, State};

/// Setpoint changes below this threshold are noise, not transitions.
const SETPOINT_TOLERANCE_C: f64 = 0.1;

/// A detected state change, ready to be normalized into a `transition`
/// document.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTransition {
    /// Event time of the row that introduced the new state.
    pub event_time: DateTime<Utc>,
    pub prev: State,
    pub next: State,
    /// Kind inferred from the state delta alone (no provider event hint).
    pub kind: &'static str,
}

/// Derives transitions from an ordered stream of runtime documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionDetector;

impl TransitionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Walk consecutive rows and collect every state change.
    pub fn detect(&self, rows: &[Runtime5m]) -> Vec<DetectedTransition> {
        let mut transitions = Vec::new();
        let mut prev: Option<State> = None;

        for row in rows {
            let current = state_of(row);

            if let Some(prev_state) = prev {
                if state_changed(&prev_state, &current) {
                    transitions.push(DetectedTransition {
                        event_time: row.event_time,
                        kind: infer_kind(&prev_state, &current),
                        prev: prev_state,
                        next: current.clone(),
                    });
                }
            }

            prev = Some(current);
        }

        transitions
    }
}

/// The state tuple of a runtime document.
pub fn state_of(row: &Runtime5m) -> State {
    State {
        mode: row.mode.clone(),
        set_heat_c: row.set_heat_c,
        set_cool_c: row.set_cool_c,
        climate: row.climate.clone(),
    }
}

/// The change predicate: mode differs, climate differs, or either setpoint
/// moved by at least 0.1 °C (absent vs. present counts as a change).
pub fn state_changed(prev: &State, current: &State) -> bool {
    if prev.mode != current.mode {
        return true;
    }
    if prev.climate != current.climate {
        return true;
    }
    if !setpoints_equal(prev.set_heat_c, current.set_heat_c) {
        return true;
    }
    if !setpoints_equal(prev.set_cool_c, current.set_cool_c) {
        return true;
    }
    false
}

/// Classify a transition from the state delta alone.
pub fn infer_kind(prev: &State, current: &State) -> &'static str {
    if prev.mode != current.mode {
        return "manual";
    }

    if prev.climate != current.climate {
        if current.climate == "Away" || current.climate == "Vacation" {
            return "vacation";
        }
        return "schedule";
    }

    if !setpoints_equal(prev.set_heat_c, current.set_heat_c)
        || !setpoints_equal(prev.set_cool_c, current.set_cool_c)
    {
        return "hold";
    }

    "unknown"
}

fn setpoints_equal(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() < SETPOINT_TOLERANCE_C,
        _ => false,
    }
}
