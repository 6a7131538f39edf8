use anyhow::Result;

use crate::detect::model::DetectionModel;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Replays a fixed script of per-frame detections.
///
/// Frame `n` gets entry `n` of the script; once the script runs out the last
/// entry repeats. An empty script reports nothing. Used by tests and by the
/// synthetic demo deployment when no inference service is configured.
pub struct ScriptedModel {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ScriptedModel {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Same detections on every frame.
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectionModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let Some(last) = self.script.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let entry = self.script[self.cursor.min(last)].clone();
        self.cursor = self.cursor.saturating_add(1);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 0).unwrap()
    }

    #[test]
    fn scripted_model_repeats_last_entry() {
        let person = Detection::person(BoundingBox::new(10.0, 10.0, 4.0, 8.0));
        let mut model = ScriptedModel::new(vec![vec![], vec![person.clone()]]);
        let frame = blank_frame();

        assert!(model.infer(&frame).unwrap().is_empty());
        assert_eq!(model.infer(&frame).unwrap(), vec![person.clone()]);
        assert_eq!(model.infer(&frame).unwrap(), vec![person]);
    }

    #[test]
    fn empty_script_reports_nothing() {
        let mut model = ScriptedModel::empty();
        assert!(model.infer(&blank_frame()).unwrap().is_empty());
    }
}
