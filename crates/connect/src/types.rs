//! Wire types for the cloud API.

use chrono::{DateTime, Utc};
use glucolog_core::readings::{MealContext, ReadingPayload, ReadingUnit, RemoteReading};
use serde::{Deserialize, Serialize};

/// A reading as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingDto {
    pub id: i64,
    pub value: f64,
    pub unit: ReadingUnit,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub context: MealContext,
}

impl From<ReadingDto> for RemoteReading {
    fn from(dto: ReadingDto) -> Self {
        RemoteReading {
            id: dto.id,
            value: dto.value,
            unit: dto.unit,
            recorded_at: dto.recorded_at,
            notes: dto.notes,
            context: dto.context,
        }
    }
}

/// Body for POST /api/v1/readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReadingRequest {
    pub value: f64,
    pub unit: ReadingUnit,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub context: MealContext,
}

impl From<&ReadingPayload> for CreateReadingRequest {
    fn from(payload: &ReadingPayload) -> Self {
        Self {
            value: payload.value,
            unit: payload.unit,
            recorded_at: payload.recorded_at,
            notes: payload.notes.clone(),
            context: payload.context,
        }
    }
}

/// Envelope for list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingListResponse {
    pub readings: Vec<ReadingDto>,
}

/// Gamification/profile payload; the engine only triggers the refresh and
/// discards the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDto {
    pub streak_days: i32,
    pub points: i64,
    #[serde(default)]
    pub level: Option<String>,
}

/// Error response shape from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reading_dto_deserializes_backend_shape() {
        let json = r#"{
            "id": 999,
            "value": 150.0,
            "unit": "mg_dl",
            "recordedAt": "2026-03-01T08:00:00Z",
            "context": "fasting"
        }"#;
        let dto: ReadingDto = serde_json::from_str(json).expect("deserialize reading");
        assert_eq!(dto.id, 999);
        assert_eq!(dto.unit, ReadingUnit::MgDl);
        assert!(dto.notes.is_none());
        assert_eq!(
            dto.recorded_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn create_request_omits_absent_notes() {
        let request = CreateReadingRequest {
            value: 120.0,
            unit: ReadingUnit::MgDl,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: None,
            context: MealContext::BeforeMeal,
        };
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(!json.contains("notes"));
        assert!(json.contains("\"before_meal\""));
    }
}
