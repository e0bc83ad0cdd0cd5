//! Composite sensor view

use serde::{Deserialize, Serialize};
use storage::{Reading, Sensor, SensorId};

/// Identity merged with the current live reading, built on read.
///
/// Serializes as one flat object. `id` and `name` always come from the
/// identity store; reading fields with those names are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeView {
    pub id: SensorId,
    pub name: String,
    #[serde(flatten)]
    pub reading: Reading,
}

impl CompositeView {
    /// Merge a reading under an identity. `None` yields identity fields only.
    pub fn merge(sensor: Sensor, reading: Option<Reading>) -> Self {
        let mut reading = reading.unwrap_or_default();
        reading.remove("id");
        reading.remove("name");

        Self {
            id: sensor.id,
            name: sensor.name,
            reading,
        }
    }

    /// Whether any reading fields are present
    pub fn has_reading(&self) -> bool {
        !self.reading.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sensor() -> Sensor {
        Sensor {
            id: 4,
            name: "roof".to_string(),
        }
    }

    #[test]
    fn test_identity_wins_collisions() {
        let reading = json!({"id": 999, "name": "spoofed", "temperature": 21.5})
            .as_object()
            .cloned();

        let view = CompositeView::merge(sensor(), reading);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json, json!({"id": 4, "name": "roof", "temperature": 21.5}));
    }

    #[test]
    fn test_merge_without_reading() {
        let view = CompositeView::merge(sensor(), None);
        assert!(!view.has_reading());
        assert_eq!(serde_json::to_value(&view).unwrap(), json!({"id": 4, "name": "roof"}));
    }

    #[test]
    fn test_deserialize_flat_object() {
        let view: CompositeView =
            serde_json::from_value(json!({"id": 1, "name": "a", "humidity": 55})).unwrap();
        assert_eq!(view.id, 1);
        assert_eq!(view.reading.get("humidity"), Some(&json!(55)));
        assert!(!view.reading.contains_key("id"));
    }
}
