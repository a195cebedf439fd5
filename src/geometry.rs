//! Spotlight window height derived from which result panels are showing.

/// Layout constants in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryConstants {
    pub width: f64,
    /// Input row height
    pub base_height: f64,
    pub padding: f64,
    /// Translation dropdown height
    pub dropdown_height: f64,
    /// Gap above each result panel
    pub margin: f64,
}

impl Default for GeometryConstants {
    fn default() -> Self {
        Self {
            width: 640.0,
            base_height: 68.0,
            padding: 8.0,
            dropdown_height: 60.0,
            margin: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryInputs {
    pub translation_visible: bool,
    pub answer_visible: bool,
    /// Rendered answer height; 0 until the panel has been measured
    pub measured_answer_height: f64,
}

pub fn compute_height(constants: &GeometryConstants, inputs: &GeometryInputs) -> f64 {
    let mut height = constants.base_height + constants.padding;
    if inputs.translation_visible {
        height += constants.dropdown_height + constants.margin;
    }
    if inputs.answer_visible && inputs.measured_answer_height > 0.0 {
        height += inputs.measured_answer_height + constants.margin;
    }
    height
}

/// Tracks the inputs and reports a new height only when it actually changes.
///
/// When the answer panel appears its height is unknown; the first frame uses
/// the height without it and the measurement that follows produces a single
/// corrective resize.
#[derive(Debug)]
pub struct GeometryReactor {
    constants: GeometryConstants,
    inputs: GeometryInputs,
    current: f64,
}

impl GeometryReactor {
    pub fn new(constants: GeometryConstants) -> Self {
        let inputs = GeometryInputs::default();
        Self {
            current: compute_height(&constants, &inputs),
            constants,
            inputs,
        }
    }

    pub fn height(&self) -> f64 {
        self.current
    }

    pub fn inputs(&self) -> GeometryInputs {
        self.inputs
    }

    pub fn set_translation_visible(&mut self, visible: bool) -> Option<f64> {
        self.inputs.translation_visible = visible;
        self.recompute()
    }

    pub fn set_answer_visible(&mut self, visible: bool) -> Option<f64> {
        if !visible {
            // A hidden panel has to be measured again when it reappears.
            self.inputs.measured_answer_height = 0.0;
        }
        self.inputs.answer_visible = visible;
        self.recompute()
    }

    /// A new query replaced the answer; its old measurement no longer applies.
    pub fn answer_restarted(&mut self) -> Option<f64> {
        self.inputs.measured_answer_height = 0.0;
        self.inputs.answer_visible = true;
        self.recompute()
    }

    pub fn set_measured_answer_height(&mut self, height: f64) -> Option<f64> {
        self.inputs.measured_answer_height = if height.is_finite() { height.max(0.0) } else { 0.0 };
        self.recompute()
    }

    fn recompute(&mut self) -> Option<f64> {
        let next = compute_height(&self.constants, &self.inputs);
        if (next - self.current).abs() < 0.5 {
            return None;
        }
        self.current = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_panels() {
        let inputs = GeometryInputs {
            translation_visible: true,
            answer_visible: true,
            measured_answer_height: 40.0,
        };
        assert_eq!(compute_height(&GeometryConstants::default(), &inputs), 192.0);
    }

    #[test]
    fn test_unmeasured_answer_adds_nothing() {
        let inputs = GeometryInputs {
            translation_visible: false,
            answer_visible: true,
            measured_answer_height: 0.0,
        };
        assert_eq!(compute_height(&GeometryConstants::default(), &inputs), 76.0);
    }

    #[test]
    fn test_late_measurement_causes_one_corrective_resize() {
        let mut reactor = GeometryReactor::new(GeometryConstants::default());
        assert_eq!(reactor.height(), 76.0);

        // Panel becomes visible: provisional height is unchanged.
        assert_eq!(reactor.set_answer_visible(true), None);
        // Measurement arrives a frame later.
        assert_eq!(reactor.set_measured_answer_height(40.0), Some(124.0));
        // Re-reporting the same measurement does not resize again.
        assert_eq!(reactor.set_measured_answer_height(40.0), None);
        assert_eq!(reactor.set_answer_visible(true), None);
    }

    #[test]
    fn test_hiding_answer_forgets_measurement() {
        let mut reactor = GeometryReactor::new(GeometryConstants::default());
        reactor.set_translation_visible(true);
        reactor.set_answer_visible(true);
        reactor.set_measured_answer_height(40.0);
        assert_eq!(reactor.height(), 192.0);

        assert_eq!(reactor.set_answer_visible(false), Some(144.0));
        assert_eq!(reactor.set_answer_visible(true), None);
        assert_eq!(reactor.inputs().measured_answer_height, 0.0);
    }

    #[test]
    fn test_restarted_answer_drops_stale_measurement() {
        let mut reactor = GeometryReactor::new(GeometryConstants::default());
        reactor.set_translation_visible(true);
        reactor.set_answer_visible(true);
        assert_eq!(reactor.set_measured_answer_height(300.0), Some(452.0));

        assert_eq!(reactor.answer_restarted(), Some(144.0));
        assert!(reactor.inputs().answer_visible);
        assert_eq!(reactor.answer_restarted(), None);
    }
}
