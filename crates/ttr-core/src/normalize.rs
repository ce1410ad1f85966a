//! Vendor-row to canonical-document normalization.
//!
//! The normalizer canonicalizes labels and shapes only. Temperatures pass
//! through untouched — providers must have converted to Celsius already —
//! and every timestamp is re-expressed in UTC.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::NormalizeError;
use crate::model::{
    DeviceSnapshot, EventInfo, Runtime5m, RuntimeRow, Snapshot, State, ThermostatRef, Transition,
    TYPE_DEVICE_SNAPSHOT, TYPE_RUNTIME_5M, TYPE_TRANSITION,
};

/// Translates provider payloads into canonical documents.
pub struct Normalizer {
    timezone: Tz,
    mode_map: HashMap<&'static str, &'static str>,
    climate_map: HashMap<&'static str, &'static str>,
    equipment_key_map: HashMap<&'static str, &'static str>,
    event_kind_map: HashMap<&'static str, &'static str>,
}

impl Normalizer {
    /// Build a normalizer for the given IANA timezone. Fails when the
    /// timezone is unknown.
    pub fn new(timezone: &str) -> Result<Self, NormalizeError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| NormalizeError::UnknownTimezone {
                timezone: timezone.to_string(),
            })?;

        Ok(Self {
            timezone: tz,
            mode_map: HashMap::from([
                ("heat", "heat"),
                ("heating", "heat"),
                ("cool", "cool"),
                ("cooling", "cool"),
                ("auto", "auto"),
                ("automatic", "auto"),
                ("off", "off"),
                ("disabled", "off"),
            ]),
            climate_map: HashMap::from([
                ("home", "Home"),
                ("Home", "Home"),
                ("HOME", "Home"),
                ("away", "Away"),
                ("Away", "Away"),
                ("AWAY", "Away"),
                ("sleep", "Sleep"),
                ("Sleep", "Sleep"),
                ("SLEEP", "Sleep"),
                ("sleeping", "Sleep"),
                ("vacation", "Vacation"),
                ("Vacation", "Vacation"),
                ("VACATION", "Vacation"),
            ]),
            equipment_key_map: HashMap::from([
                ("compHeat1", "compHeat1"),
                ("compheat1", "compHeat1"),
                ("comp_heat_1", "compHeat1"),
                ("compHeat2", "compHeat2"),
                ("compheat2", "compHeat2"),
                ("comp_heat_2", "compHeat2"),
                ("compCool1", "compCool1"),
                ("compcool1", "compCool1"),
                ("comp_cool_1", "compCool1"),
                ("compCool2", "compCool2"),
                ("compcool2", "compCool2"),
                ("comp_cool_2", "compCool2"),
                ("fan", "fan"),
                ("Fan", "fan"),
                ("FAN", "fan"),
            ]),
            event_kind_map: HashMap::from([
                ("hold", "hold"),
                ("temp_hold", "hold"),
                ("temporary_hold", "hold"),
                ("vacation", "vacation"),
                ("vacation_hold", "vacation"),
                ("resume", "resume"),
                ("resume_schedule", "resume"),
                ("schedule", "schedule"),
                ("scheduled", "schedule"),
                ("manual", "manual"),
                ("manual_override", "manual"),
            ]),
        })
    }

    /// Convert one provider runtime row into a canonical `runtime_5m`
    /// document.
    pub fn runtime_5m(&self, row: &RuntimeRow, provider: &str) -> Runtime5m {
        Runtime5m {
            doc_type: TYPE_RUNTIME_5M.to_string(),
            thermostat_id: row.thermostat_ref.id.clone(),
            thermostat_name: row.thermostat_ref.name.clone(),
            household_id: row.thermostat_ref.household_id.clone(),
            event_time: row.event_time,
            mode: self.mode(&row.mode),
            climate: self.climate(&row.climate),
            set_heat_c: row.set_heat_c,
            set_cool_c: row.set_cool_c,
            avg_temp_c: row.avg_temp_c,
            outdoor_temp_c: row.outdoor_temp_c,
            outdoor_humidity: row.outdoor_humidity,
            equipment: row.equipment.as_ref().map(|e| self.equipment(e)),
            sensors: row.sensors.clone(),
            provider: provider_namespace(provider, serde_json::to_value(row).ok()),
        }
    }

    /// Build a canonical `transition` document from a state pair.
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        &self,
        tr: &ThermostatRef,
        event_time: DateTime<Utc>,
        prev: &State,
        next: &State,
        event: EventInfo,
        provider: &str,
        context: Option<serde_json::Value>,
    ) -> Transition {
        Transition {
            doc_type: TYPE_TRANSITION.to_string(),
            event_time,
            thermostat_id: tr.id.clone(),
            thermostat_name: tr.name.clone(),
            prev: self.state(prev),
            next: self.state(next),
            event: self.event(event),
            provider: provider_namespace(provider, context),
        }
    }

    /// Convert a provider snapshot into a canonical `device_snapshot`.
    pub fn device_snapshot(&self, snapshot: &Snapshot, provider: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            doc_type: TYPE_DEVICE_SNAPSHOT.to_string(),
            collected_at: snapshot.collected_at,
            thermostat_id: snapshot.thermostat_ref.id.clone(),
            thermostat_name: snapshot.thermostat_ref.name.clone(),
            program: snapshot.program.clone(),
            events_active: snapshot.events_active.clone(),
            provider: provider_namespace(provider, serde_json::to_value(snapshot).ok()),
        }
    }

    /// The timezone the normalizer was built with. Canonical documents are
    /// always UTC; this is kept for local-time reasoning only.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Canonicalize a mode string. Empty input means off; unknown values are
    /// kept (lowercased) and flagged.
    pub fn mode(&self, mode: &str) -> String {
        if mode.is_empty() {
            return "off".to_string();
        }

        let lower = mode.to_lowercase();
        if let Some(mapped) = self.mode_map.get(lower.as_str()) {
            return (*mapped).to_string();
        }

        warn!(original = mode, "unmapped mode value encountered");
        lower
    }

    /// Canonicalize a climate label. Empty input means Home; unknown values
    /// are preserved verbatim and flagged.
    pub fn climate(&self, climate: &str) -> String {
        if climate.is_empty() {
            return "Home".to_string();
        }

        if let Some(mapped) = self.climate_map.get(climate) {
            return (*mapped).to_string();
        }

        warn!(original = climate, "unmapped climate value encountered");
        climate.to_string()
    }

    /// Canonicalize equipment map keys; unknown keys pass through flagged.
    pub fn equipment(&self, equipment: &BTreeMap<String, bool>) -> BTreeMap<String, bool> {
        equipment
            .iter()
            .map(|(key, value)| (self.equipment_key(key), *value))
            .collect()
    }

    fn equipment_key(&self, key: &str) -> String {
        if let Some(mapped) = self.equipment_key_map.get(key) {
            return (*mapped).to_string();
        }

        warn!(original = key, "unmapped equipment key encountered");
        key.to_string()
    }

    /// Canonicalize event info; an unknown kind falls back to inference from
    /// the event name.
    pub fn event(&self, event: EventInfo) -> EventInfo {
        let mut kind = self.event_kind(&event.kind);

        if kind == "unknown" {
            if let Some(name) = event.name.as_deref() {
                if !name.is_empty() {
                    kind = infer_event_kind_from_name(name);
                }
            }
        }

        EventInfo {
            kind,
            name: event.name,
            data: event.data,
        }
    }

    fn event_kind(&self, kind: &str) -> String {
        if kind.is_empty() {
            return "unknown".to_string();
        }

        let lower = kind.to_lowercase();
        if let Some(mapped) = self.event_kind_map.get(lower.as_str()) {
            return (*mapped).to_string();
        }

        warn!(original = kind, "unmapped event kind encountered");
        "unknown".to_string()
    }

    /// Canonicalize a state tuple (labels only; setpoints pass through).
    pub fn state(&self, state: &State) -> State {
        State {
            mode: self.mode(&state.mode),
            set_heat_c: state.set_heat_c,
            set_cool_c: state.set_cool_c,
            climate: self.climate(&state.climate),
        }
    }
}

fn provider_namespace(
    provider: &str,
    context: Option<serde_json::Value>,
) -> Option<BTreeMap<String, serde_json::Value>> {
    let mut map = BTreeMap::new();
    map.insert(
        provider.to_string(),
        context.unwrap_or(serde_json::Value::Null),
    );
    Some(map)
}

fn infer_event_kind_from_name(name: &str) -> String {
    let lower = name.to_lowercase();

    let kind = if lower.contains("hold") {
        if lower.contains("vacation") {
            "vacation"
        } else {
            "hold"
        }
    } else if lower.contains("vacation") {
        "vacation"
    } else if lower.contains("resume") {
        "resume"
    } else if lower.contains("schedule") {
        "schedule"
    } else if lower.contains("manual") {
        "manual"
    } else {
        "unknown"
    };

    kind.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new("UTC").unwrap()
    }

    fn thermostat() -> ThermostatRef {
        ThermostatRef {
            id: "th1".to_string(),
            name: "Hallway".to_string(),
            provider: "ecobee".to_string(),
            household_id: Some("h9".to_string()),
        }
    }

    #[test]
    fn unknown_timezone_fails_construction() {
        assert!(Normalizer::new("Mars/Olympus_Mons").is_err());
        assert!(Normalizer::new("America/Chicago").is_ok());
    }

    #[test]
    fn mode_mapping_table() {
        let n = normalizer();
        for (input, expected) in [
            ("heat", "heat"),
            ("Heating", "heat"),
            ("COOL", "cool"),
            ("cooling", "cool"),
            ("auto", "auto"),
            ("Automatic", "auto"),
            ("off", "off"),
            ("disabled", "off"),
            ("", "off"),
        ] {
            assert_eq!(n.mode(input), expected, "mode {input:?}");
        }

        // Unknown values are preserved, lowercased.
        assert_eq!(n.mode("EmergencyHeat"), "emergencyheat");
    }

    #[test]
    fn climate_mapping_table() {
        let n = normalizer();
        for (input, expected) in [
            ("home", "Home"),
            ("HOME", "Home"),
            ("away", "Away"),
            ("Sleep", "Sleep"),
            ("sleeping", "Sleep"),
            ("VACATION", "Vacation"),
            ("", "Home"),
        ] {
            assert_eq!(n.climate(input), expected, "climate {input:?}");
        }

        // Unknown values are preserved verbatim.
        assert_eq!(n.climate("Workout"), "Workout");
    }

    #[test]
    fn equipment_key_mapping() {
        let n = normalizer();
        let input: BTreeMap<String, bool> = [
            ("comp_heat_1".to_string(), true),
            ("compcool1".to_string(), false),
            ("FAN".to_string(), true),
            ("auxHeat3".to_string(), true),
        ]
        .into();

        let out = n.equipment(&input);
        assert_eq!(out.get("compHeat1"), Some(&true));
        assert_eq!(out.get("compCool1"), Some(&false));
        assert_eq!(out.get("fan"), Some(&true));
        assert_eq!(out.get("auxHeat3"), Some(&true));
    }

    #[test]
    fn event_kind_mapping_table() {
        let n = normalizer();
        for (input, expected) in [
            ("hold", "hold"),
            ("TEMP_HOLD", "hold"),
            ("temporary_hold", "hold"),
            ("vacation_hold", "vacation"),
            ("resume_schedule", "resume"),
            ("Scheduled", "schedule"),
            ("manual_override", "manual"),
            ("", "unknown"),
            ("mystery", "unknown"),
        ] {
            let out = n.event(EventInfo {
                kind: input.to_string(),
                ..Default::default()
            });
            assert_eq!(out.kind, expected, "kind {input:?}");
        }
    }

    #[test]
    fn event_kind_inferred_from_name() {
        let n = normalizer();
        for (name, expected) in [
            ("Morning Hold", "hold"),
            ("Vacation hold until Friday", "vacation"),
            ("Summer Vacation", "vacation"),
            ("resume program", "resume"),
            ("Weekly Schedule", "schedule"),
            ("Manual override by user", "manual"),
            ("Something else", "unknown"),
        ] {
            let out = n.event(EventInfo {
                kind: "bogus".to_string(),
                name: Some(name.to_string()),
                data: None,
            });
            assert_eq!(out.kind, expected, "name {name:?}");
        }
    }

    #[test]
    fn recognized_kind_skips_name_inference() {
        let n = normalizer();
        let out = n.event(EventInfo {
            kind: "hold".to_string(),
            name: Some("Vacation in name only".to_string()),
            data: None,
        });
        assert_eq!(out.kind, "hold");
    }

    #[test]
    fn runtime_row_normalizes_labels_and_keeps_temperatures() {
        let n = normalizer();
        let row = RuntimeRow {
            thermostat_ref: thermostat(),
            event_time: "2026-01-05T12:05:00Z".parse().unwrap(),
            mode: "Heating".to_string(),
            climate: "home".to_string(),
            set_heat_c: Some(20.5),
            set_cool_c: None,
            avg_temp_c: Some(21.3),
            outdoor_temp_c: Some(-3.0),
            outdoor_humidity: Some(55),
            equipment: Some([("compheat1".to_string(), true)].into()),
            sensors: Some([("s1".to_string(), 20.9)].into()),
        };

        let doc = n.runtime_5m(&row, "ecobee");
        assert_eq!(doc.doc_type, TYPE_RUNTIME_5M);
        assert_eq!(doc.thermostat_id, "th1");
        assert_eq!(doc.household_id.as_deref(), Some("h9"));
        assert_eq!(doc.mode, "heat");
        assert_eq!(doc.climate, "Home");
        // Temperatures pass through without conversion.
        assert_eq!(doc.set_heat_c, Some(20.5));
        assert_eq!(doc.avg_temp_c, Some(21.3));
        assert_eq!(doc.outdoor_temp_c, Some(-3.0));
        assert_eq!(
            doc.equipment.as_ref().unwrap().get("compHeat1"),
            Some(&true)
        );
        assert!(doc.provider.as_ref().unwrap().contains_key("ecobee"));
    }

    #[test]
    fn transition_normalizes_both_states() {
        let n = normalizer();
        let prev = State {
            mode: "Heating".to_string(),
            set_heat_c: Some(20.0),
            set_cool_c: None,
            climate: "home".to_string(),
        };
        let next = State {
            mode: "COOL".to_string(),
            set_heat_c: None,
            set_cool_c: Some(24.0),
            climate: "away".to_string(),
        };

        let doc = n.transition(
            &thermostat(),
            "2026-01-05T12:10:00Z".parse().unwrap(),
            &prev,
            &next,
            EventInfo {
                kind: "manual".to_string(),
                ..Default::default()
            },
            "ecobee",
            None,
        );

        assert_eq!(doc.doc_type, TYPE_TRANSITION);
        assert_eq!(doc.prev.mode, "heat");
        assert_eq!(doc.prev.climate, "Home");
        assert_eq!(doc.next.mode, "cool");
        assert_eq!(doc.next.climate, "Away");
        assert_eq!(doc.event.kind, "manual");
    }

    #[test]
    fn snapshot_carries_program_and_events() {
        let n = normalizer();
        let snapshot = Snapshot {
            thermostat_ref: thermostat(),
            collected_at: "2026-01-05T12:00:00Z".parse().unwrap(),
            program: Some(serde_json::json!({"name": "Winter"})),
            events_active: Some(vec![serde_json::json!({"type": "hold"})]),
        };

        let doc = n.device_snapshot(&snapshot, "ecobee");
        assert_eq!(doc.doc_type, TYPE_DEVICE_SNAPSHOT);
        assert_eq!(doc.program.as_ref().unwrap()["name"], "Winter");
        assert_eq!(doc.events_active.as_ref().unwrap().len(), 1);
    }
}
