use serde::{Deserialize, Serialize};

/// Class label the presence policy alerts on.
pub const PERSON_LABEL: &str = "person";

/// COCO-17 landmark indices used by the posture policy.
pub const COCO_NOSE: usize = 0;
pub const COCO_LEFT_ANKLE: usize = 15;
pub const COCO_RIGHT_ANKLE: usize = 16;

/// Axis-aligned box in pixel coordinates, centre-anchored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// (left, top, right, bottom)
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let half_w = self.w / 2.0;
        let half_h = self.h / 2.0;
        (
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// One entity reported by the detection model for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    #[serde(rename = "class")]
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
    /// Ordered landmarks (COCO-17 for pose models). Absent for plain detectors.
    #[serde(default)]
    pub keypoints: Option<Vec<Keypoint>>,
    /// Cross-frame identity, when the model tracks.
    #[serde(default)]
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: 1.0,
            keypoints: None,
            track_id: None,
        }
    }

    pub fn person(bbox: BoundingBox) -> Self {
        Self::new(PERSON_LABEL, bbox)
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = Some(keypoints);
        self
    }

    pub fn is_person(&self) -> bool {
        self.label.eq_ignore_ascii_case(PERSON_LABEL)
    }

    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.as_ref().and_then(|points| points.get(index))
    }
}
