//! Per-detection classification.
//!
//! A `ClassificationPolicy` turns one detection into a `Verdict`. Two policies
//! ship with the crate:
//!
//! - `PresencePolicy`: any person is an alert (intrusion / occupancy).
//! - `PosturePolicy`: a person whose box is wider than tall, or whose head is
//!   barely above the ankles relative to the box height, is an alert (fall).
//!
//! Classification is pure: same detections in, same verdicts out.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detect::{BoundingBox, Detection, COCO_LEFT_ANKLE, COCO_NOSE, COCO_RIGHT_ANKLE};
use crate::error::PipelineError;

/// Box aspect ratio (w / h) above which a person counts as lying down.
pub const FALL_ASPECT_RATIO: f64 = 1.2;
/// Minimum head-to-ankle span, as a fraction of box height, for an upright person.
pub const FALL_VERTICAL_SPAN_RATIO: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    Presence,
    Posture,
}

impl std::str::FromStr for ClassifierMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "presence" => Ok(ClassifierMode::Presence),
            "posture" | "fall" => Ok(ClassifierMode::Posture),
            other => Err(anyhow::anyhow!(
                "unknown classifier mode '{}'; expected presence or posture",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictState {
    Normal,
    Alert,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    /// Index of the detection in the model output.
    pub index: usize,
    pub state: VerdictState,
    pub bbox: BoundingBox,
    pub label: String,
}

impl Verdict {
    fn for_detection(index: usize, detection: &Detection, state: VerdictState) -> Self {
        Self {
            index,
            state,
            bbox: detection.bbox,
            label: detection.label.clone(),
        }
    }

    pub fn is_alert(&self) -> bool {
        self.state == VerdictState::Alert
    }
}

/// Outcome of classifying every detection of one frame.
#[derive(Debug, Default)]
pub struct FrameAssessment {
    pub verdicts: Vec<Verdict>,
    pub skipped: Vec<PipelineError>,
    pub person_count: usize,
}

impl FrameAssessment {
    pub fn alert_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_alert()).count()
    }

    pub fn has_alert(&self) -> bool {
        self.verdicts.iter().any(Verdict::is_alert)
    }
}

pub trait ClassificationPolicy: Send + Sync {
    fn mode(&self) -> ClassifierMode;

    /// Throttle stream the policy's alerts are gated on.
    fn stream_id(&self) -> &'static str;

    /// Classify one detection. `Ok(None)` means the detection is not relevant
    /// to this policy (e.g. a car in presence mode).
    fn classify(&self, index: usize, detection: &Detection)
        -> Result<Option<Verdict>, PipelineError>;

    /// Notification text for an alert raised on this frame.
    fn alert_message(
        &self,
        assessment: &FrameAssessment,
        at: &DateTime<Local>,
        screenshot: Option<&Path>,
    ) -> String;
}

/// Classify all detections of a frame. Failures are collected per detection
/// and never abort the frame.
pub fn classify_frame(
    policy: &dyn ClassificationPolicy,
    detections: &[Detection],
) -> FrameAssessment {
    let mut assessment = FrameAssessment {
        person_count: detections.iter().filter(|d| d.is_person()).count(),
        ..FrameAssessment::default()
    };
    for (index, detection) in detections.iter().enumerate() {
        match policy.classify(index, detection) {
            Ok(Some(verdict)) => assessment.verdicts.push(verdict),
            Ok(None) => {}
            Err(err) => {
                log::debug!("{}", err);
                assessment.skipped.push(err);
            }
        }
    }
    assessment
}

pub fn policy_for_mode(mode: ClassifierMode) -> Box<dyn ClassificationPolicy> {
    match mode {
        ClassifierMode::Presence => Box::new(PresencePolicy),
        ClassifierMode::Posture => Box::new(PosturePolicy::default()),
    }
}

fn format_time(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

// ----------------------------------------------------------------------------
// Presence
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct PresencePolicy;

impl ClassificationPolicy for PresencePolicy {
    fn mode(&self) -> ClassifierMode {
        ClassifierMode::Presence
    }

    fn stream_id(&self) -> &'static str {
        "presence"
    }

    fn classify(
        &self,
        index: usize,
        detection: &Detection,
    ) -> Result<Option<Verdict>, PipelineError> {
        if !detection.is_person() {
            return Ok(None);
        }
        Ok(Some(Verdict::for_detection(
            index,
            detection,
            VerdictState::Alert,
        )))
    }

    fn alert_message(
        &self,
        assessment: &FrameAssessment,
        at: &DateTime<Local>,
        screenshot: Option<&Path>,
    ) -> String {
        let mut message = format!(
            "[Person detection alert]\n\nTime: {}\nStatus: {} person(s) detected\n",
            format_time(at),
            assessment.person_count
        );
        if let Some(path) = screenshot {
            message.push_str(&format!("\nScreenshot saved to: {}\n", path.display()));
        }
        message.push_str("\nPlease check the camera feed!");
        message
    }
}

// ----------------------------------------------------------------------------
// Posture (fall)
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct PosturePolicy {
    pub aspect_ratio_threshold: f64,
    pub vertical_span_ratio: f64,
}

impl Default for PosturePolicy {
    fn default() -> Self {
        Self {
            aspect_ratio_threshold: FALL_ASPECT_RATIO,
            vertical_span_ratio: FALL_VERTICAL_SPAN_RATIO,
        }
    }
}

impl PosturePolicy {
    fn landmark_y(index: usize, detection: &Detection, which: usize) -> Result<f32, PipelineError> {
        detection
            .keypoint(which)
            .map(|point| point.y)
            .ok_or_else(|| PipelineError::ClassificationSkipped {
                index,
                reason: format!("missing landmark {}", which),
            })
    }
}

impl ClassificationPolicy for PosturePolicy {
    fn mode(&self) -> ClassifierMode {
        ClassifierMode::Posture
    }

    fn stream_id(&self) -> &'static str {
        "fall"
    }

    fn classify(
        &self,
        index: usize,
        detection: &Detection,
    ) -> Result<Option<Verdict>, PipelineError> {
        if !detection.is_person() {
            return Ok(None);
        }
        let nose_y = Self::landmark_y(index, detection, COCO_NOSE)?;
        let left_ankle_y = Self::landmark_y(index, detection, COCO_LEFT_ANKLE)?;
        let right_ankle_y = Self::landmark_y(index, detection, COCO_RIGHT_ANKLE)?;

        let BoundingBox { w, h, .. } = detection.bbox;
        if !(h.is_finite() && w.is_finite()) || h <= 0.0 {
            return Ok(Some(Verdict::for_detection(
                index,
                detection,
                VerdictState::Normal,
            )));
        }

        // Ratios in f64: a value exactly on a threshold is Normal.
        let (w, h) = (f64::from(w), f64::from(h));
        let vertical_span =
            (f64::from(left_ankle_y) + f64::from(right_ankle_y)) / 2.0 - f64::from(nose_y);
        let fallen = w / h > self.aspect_ratio_threshold
            || vertical_span / h < self.vertical_span_ratio;
        let state = if fallen {
            VerdictState::Alert
        } else {
            VerdictState::Normal
        };
        Ok(Some(Verdict::for_detection(index, detection, state)))
    }

    fn alert_message(
        &self,
        _assessment: &FrameAssessment,
        at: &DateTime<Local>,
        screenshot: Option<&Path>,
    ) -> String {
        let mut message = format!(
            "[Fall detection alert]\nTime: {}\nStatus: a person has fallen\n",
            format_time(at)
        );
        if let Some(path) = screenshot {
            message.push_str(&format!("Screenshot saved to: {}\n", path.display()));
        }
        message.push_str("Please check the camera feed!");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Keypoint;

    /// 17 landmarks with the nose at `nose_y` and both ankles at `ankle_y`.
    fn pose(nose_y: f32, ankle_y: f32) -> Vec<Keypoint> {
        let mut points = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                confidence: 0.9
            };
            17
        ];
        points[COCO_NOSE].y = nose_y;
        points[COCO_LEFT_ANKLE].y = ankle_y;
        points[COCO_RIGHT_ANKLE].y = ankle_y;
        points
    }

    fn person(w: f32, h: f32, nose_y: f32, ankle_y: f32) -> Detection {
        Detection::person(BoundingBox::new(100.0, 100.0, w, h)).with_keypoints(pose(nose_y, ankle_y))
    }

    fn state_of(detection: &Detection) -> VerdictState {
        PosturePolicy::default()
            .classify(0, detection)
            .unwrap()
            .unwrap()
            .state
    }

    #[test]
    fn wide_boxes_are_falls() {
        for (w, h) in [(121.0, 100.0), (200.0, 50.0), (13.0, 10.0), (1000.0, 1.0)] {
            // Upright landmarks: only the aspect ratio can trigger.
            let detection = person(w, h, 0.0, h);
            assert_eq!(state_of(&detection), VerdictState::Alert, "w={} h={}", w, h);
        }
    }

    #[test]
    fn upright_people_are_normal() {
        for (w, h, span) in [(50.0, 100.0, 30.0), (120.0, 100.0, 90.0), (10.0, 200.0, 150.0)] {
            let detection = person(w, h, 10.0, 10.0 + span);
            assert_eq!(state_of(&detection), VerdictState::Normal, "w={} h={}", w, h);
        }
    }

    #[test]
    fn thresholds_are_exclusive() {
        // span exactly 0.3h, aspect exactly 1.2
        for (w, h, span) in [(50.0, 100.0, 30.0), (120.0, 100.0, 60.0), (36.0, 30.0, 9.0)] {
            let detection = person(w, h, 10.0, 10.0 + span);
            assert_eq!(state_of(&detection), VerdictState::Normal, "w={} h={}", w, h);
        }
        let just_under = person(50.0, 100.0, 10.0, 39.9);
        assert_eq!(state_of(&just_under), VerdictState::Alert);
        let just_wide = person(120.5, 100.0, 10.0, 90.0);
        assert_eq!(state_of(&just_wide), VerdictState::Alert);
    }

    #[test]
    fn collapsed_vertical_span_is_a_fall() {
        let detection = person(50.0, 100.0, 80.0, 100.0);
        assert_eq!(state_of(&detection), VerdictState::Alert);
    }

    #[test]
    fn zero_height_is_normal() {
        let detection = person(50.0, 0.0, 0.0, 0.0);
        assert_eq!(state_of(&detection), VerdictState::Normal);
    }

    #[test]
    fn missing_landmarks_skip_only_that_detection() {
        let no_landmarks = Detection::person(BoundingBox::new(0.0, 0.0, 300.0, 100.0));
        let short_landmarks = Detection::person(BoundingBox::new(0.0, 0.0, 300.0, 100.0))
            .with_keypoints(pose(0.0, 0.0)[..10].to_vec());
        let fallen = person(300.0, 100.0, 0.0, 100.0);

        let assessment = classify_frame(
            &PosturePolicy::default(),
            &[no_landmarks, short_landmarks, fallen],
        );
        assert_eq!(assessment.skipped.len(), 2);
        assert_eq!(assessment.verdicts.len(), 1);
        assert_eq!(assessment.verdicts[0].index, 2);
        assert!(assessment.has_alert());
        assert_eq!(assessment.person_count, 3);
    }

    #[test]
    fn presence_alerts_on_people_only() {
        let detections = vec![
            Detection::person(BoundingBox::new(10.0, 10.0, 5.0, 10.0)),
            Detection::new("car", BoundingBox::new(50.0, 50.0, 30.0, 20.0)),
        ];
        let assessment = classify_frame(&PresencePolicy, &detections);
        assert_eq!(assessment.person_count, 1);
        assert_eq!(assessment.alert_count(), 1);
        assert_eq!(assessment.verdicts[0].label, "person");
    }

    #[test]
    fn presence_message_mentions_count_and_screenshot() {
        let assessment = FrameAssessment {
            person_count: 2,
            ..FrameAssessment::default()
        };
        let at = Local::now();
        let message =
            PresencePolicy.alert_message(&assessment, &at, Some(Path::new("/tmp/shot.jpg")));
        assert!(message.contains("2 person(s)"));
        assert!(message.contains("/tmp/shot.jpg"));
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("presence".parse::<ClassifierMode>().unwrap(), ClassifierMode::Presence);
        assert_eq!("Posture".parse::<ClassifierMode>().unwrap(), ClassifierMode::Posture);
        assert!("dance".parse::<ClassifierMode>().is_err());
    }
}
