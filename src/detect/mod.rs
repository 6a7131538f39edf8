mod backends;
mod model;
mod result;

pub use backends::{HttpModel, HttpModelConfig, ScriptedModel};
pub use model::DetectionModel;
pub use result::{
    BoundingBox, Detection, Keypoint, COCO_LEFT_ANKLE, COCO_NOSE, COCO_RIGHT_ANKLE, PERSON_LABEL,
};
