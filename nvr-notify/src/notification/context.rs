//! Per-dispatch alert context.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::DetectionEvent;

/// Attribute sets touched by one alert.
///
/// Built from scratch for every dispatch call and never shared between calls,
/// so profile decisions for one alert cannot leak into the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertContext {
    pub cameras: BTreeSet<String>,
    pub labels: BTreeSet<String>,
    pub sub_labels: BTreeSet<String>,
    pub zones: BTreeSet<String>,
}

impl AlertContext {
    /// Collect the attribute sets of every detection in an alert.
    pub fn from_detections<'a, I>(detections: I) -> Self
    where
        I: IntoIterator<Item = &'a DetectionEvent>,
    {
        let mut context = Self::default();
        for detection in detections {
            context.cameras.insert(detection.camera.clone());
            context.labels.insert(detection.label.clone());
            context
                .sub_labels
                .extend(detection.sub_labels.iter().cloned());
            context.zones.extend(detection.zones.iter().cloned());
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_unions_detections() {
        let detections = vec![
            DetectionEvent::new("d1", "front", "person", 0.9, 1.0)
                .with_zones(["porch"])
                .with_sub_labels(["alice"]),
            DetectionEvent::new("d2", "front", "car", 0.8, 2.0).with_zones(["driveway", "porch"]),
        ];

        let context = AlertContext::from_detections(&detections);
        assert_eq!(context.cameras.len(), 1);
        assert_eq!(context.labels.len(), 2);
        assert_eq!(context.zones.len(), 2);
        assert!(context.sub_labels.contains("alice"));
    }

    #[test]
    fn test_contexts_are_independent() {
        let person = DetectionEvent::new("d1", "front", "person", 0.9, 1.0);
        let first = AlertContext::from_detections(&[person]);
        let dog = DetectionEvent::new("d2", "back", "dog", 0.9, 1.0);
        let second = AlertContext::from_detections(&[dog]);

        assert!(!second.cameras.contains("front"));
        assert!(!second.labels.contains("person"));
        assert!(first.labels.contains("person"));
    }
}
