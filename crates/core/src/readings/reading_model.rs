//! Blood-glucose reading domain models and value-matching helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversion factor between the two supported glucose units.
pub const MMOL_L_TO_MG_DL: f64 = 18.018;

/// Measurement unit for a glucose value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingUnit {
    MgDl,
    MmolL,
}

impl ReadingUnit {
    /// Convert `value` expressed in `self` into `target` units.
    pub fn convert(self, value: f64, target: ReadingUnit) -> f64 {
        match (self, target) {
            (ReadingUnit::MgDl, ReadingUnit::MmolL) => value / MMOL_L_TO_MG_DL,
            (ReadingUnit::MmolL, ReadingUnit::MgDl) => value * MMOL_L_TO_MG_DL,
            _ => value,
        }
    }
}

/// Categorical context attached to a reading at entry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealContext {
    Fasting,
    BeforeMeal,
    AfterMeal,
    Bedtime,
    Random,
}

/// A locally stored measurement.
///
/// `local_id` is generated client-side and stable for the record's lifetime.
/// `remote_id` is assigned once the remote accepts the create. `synced` is
/// true iff the remote currently reflects this record's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub local_id: String,
    pub remote_id: Option<i64>,
    pub value: f64,
    pub unit: ReadingUnit,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub context: MealContext,
    pub synced: bool,
}

impl Reading {
    /// Build an unsynced reading from user-entered fields with a fresh
    /// local identity.
    pub fn from_payload(payload: ReadingPayload) -> Self {
        Self {
            local_id: Uuid::now_v7().to_string(),
            remote_id: None,
            value: payload.value,
            unit: payload.unit,
            recorded_at: payload.recorded_at,
            notes: payload.notes,
            context: payload.context,
            synced: false,
        }
    }

    /// Synthesize a local reading from remote data discovered during pull.
    pub fn from_remote(remote: &RemoteReading) -> Self {
        Self {
            local_id: Uuid::now_v7().to_string(),
            remote_id: Some(remote.id),
            value: remote.value,
            unit: remote.unit,
            recorded_at: remote.recorded_at,
            notes: remote.notes.clone(),
            context: remote.context,
            synced: true,
        }
    }

    /// Snapshot of the user-mutable fields, as carried by queue items.
    pub fn payload(&self) -> ReadingPayload {
        ReadingPayload {
            value: self.value,
            unit: self.unit,
            recorded_at: self.recorded_at,
            notes: self.notes.clone(),
            context: self.context,
        }
    }
}

/// User-entered fields of a reading; also the queue-item snapshot shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    pub value: f64,
    pub unit: ReadingUnit,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub context: MealContext,
}

/// A reading as the remote reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReading {
    pub id: i64,
    pub value: f64,
    pub unit: ReadingUnit,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub context: MealContext,
}

/// Compare a local value against a remote one in the remote's unit.
///
/// Both sides are normalized to the remote's canonical unit before
/// differencing, and the comparison accepts an absolute tolerance: unit
/// conversion introduces floating-point artifacts, so exact equality is a
/// correctness bug.
pub fn values_match(
    local_value: f64,
    local_unit: ReadingUnit,
    remote_value: f64,
    remote_unit: ReadingUnit,
    tolerance: f64,
) -> bool {
    let normalized = local_unit.convert(local_value, remote_unit);
    (normalized - remote_value).abs() <= tolerance
}

/// True when two timestamps fall within `window_secs` of each other.
pub fn within_link_window(a: DateTime<Utc>, b: DateTime<Utc>, window_secs: i64) -> bool {
    (a - b).num_seconds().abs() <= window_secs
}

/// True when the local record's user-visible content diverges from the
/// remote record's, under the value tolerance.
pub fn diverges(local: &Reading, remote: &RemoteReading, tolerance: f64) -> bool {
    if !values_match(local.value, local.unit, remote.value, remote.unit, tolerance) {
        return true;
    }
    let local_notes = local.notes.as_deref().unwrap_or("");
    let remote_notes = remote.notes.as_deref().unwrap_or("");
    local_notes != remote_notes || local.context != remote.context
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn remote(value: f64, unit: ReadingUnit) -> RemoteReading {
        RemoteReading {
            id: 1,
            value,
            unit,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: None,
            context: MealContext::Fasting,
        }
    }

    #[test]
    fn unit_conversion_round_trips_within_tolerance() {
        let mmol = ReadingUnit::MgDl.convert(180.0, ReadingUnit::MmolL);
        let back = ReadingUnit::MmolL.convert(mmol, ReadingUnit::MgDl);
        assert!((back - 180.0).abs() < 1e-9);
    }

    #[test]
    fn values_match_absorbs_conversion_artifacts() {
        // 5.55 mmol/L is 100.0 mg/dL up to float error.
        assert!(values_match(
            5.55,
            ReadingUnit::MmolL,
            100.0,
            ReadingUnit::MgDl,
            0.5
        ));
        assert!(!values_match(
            5.55,
            ReadingUnit::MmolL,
            104.0,
            ReadingUnit::MgDl,
            0.5
        ));
    }

    #[test]
    fn values_match_rejects_exact_equality_thinking() {
        // Same nominal value, different float representation after a
        // round-trip, still matches.
        let converted = ReadingUnit::MgDl.convert(150.0, ReadingUnit::MmolL);
        assert!(values_match(
            converted,
            ReadingUnit::MmolL,
            150.0,
            ReadingUnit::MgDl,
            0.5
        ));
    }

    #[test]
    fn divergence_checks_notes_and_context() {
        let mut local = Reading::from_remote(&remote(100.0, ReadingUnit::MgDl));
        assert!(!diverges(&local, &remote(100.0, ReadingUnit::MgDl), 0.5));

        local.notes = Some("after run".to_string());
        assert!(diverges(&local, &remote(100.0, ReadingUnit::MgDl), 0.5));

        local.notes = None;
        local.context = MealContext::Bedtime;
        assert!(diverges(&local, &remote(100.0, ReadingUnit::MgDl), 0.5));
    }

    #[test]
    fn empty_notes_and_absent_notes_are_equivalent() {
        let mut local = Reading::from_remote(&remote(100.0, ReadingUnit::MgDl));
        local.notes = Some(String::new());
        assert!(!diverges(&local, &remote(100.0, ReadingUnit::MgDl), 0.5));
    }

    #[test]
    fn link_window_is_inclusive() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert!(within_link_window(t, t + chrono::Duration::seconds(600), 600));
        assert!(!within_link_window(t, t + chrono::Duration::seconds(601), 600));
    }
}
