use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::labels::ClassId;

/// Deterministic backend for demos and tests.
///
/// Emits one detection on every `every_n`-th frame, centered and covering a
/// quarter of the frame, cycling through `classes`.
pub struct ScriptedBackend {
    every_n: u64,
    classes: Vec<ClassId>,
    confidence: f32,
    emitted: usize,
}

impl ScriptedBackend {
    pub fn new(every_n: u64, classes: Vec<ClassId>) -> Result<Self> {
        if every_n == 0 {
            return Err(anyhow!("scripted backend interval must be >= 1"));
        }
        if classes.is_empty() {
            return Err(anyhow!("scripted backend needs at least one class id"));
        }
        Ok(Self {
            every_n,
            classes,
            confidence: 0.87,
            emitted: 0,
        })
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            every_n: 25,
            classes: vec![0, 1, 2, 3, 4],
            confidence: 0.87,
            emitted: 0,
        }
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.index % self.every_n != 0 {
            return Ok(Vec::new());
        }
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let class_id = self.classes[self.emitted % self.classes.len()];
        self.emitted += 1;
        Ok(vec![Detection::new(
            BoundingBox::new(w * 0.25, h * 0.25, w * 0.75, h * 0.75),
            class_id,
            self.confidence,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(40, 20, vec![0u8; 40 * 20 * 3], index).unwrap()
    }

    #[test]
    fn scripted_backend_emits_on_interval() {
        let mut backend = ScriptedBackend::new(2, vec![3, 1]).unwrap();

        assert!(backend.detect(&frame(1)).unwrap().is_empty());

        let d = backend.detect(&frame(2)).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].class_id, 3);
        assert_eq!(d[0].bbox, BoundingBox::new(10.0, 5.0, 30.0, 15.0));

        assert!(backend.detect(&frame(3)).unwrap().is_empty());
        assert_eq!(backend.detect(&frame(4)).unwrap()[0].class_id, 1);
    }

    #[test]
    fn scripted_backend_rejects_zero_interval() {
        assert!(ScriptedBackend::new(0, vec![1]).is_err());
        assert!(ScriptedBackend::new(1, vec![]).is_err());
    }
}
