use anyhow::{anyhow, Result};

use crate::detect::backend::{Delegate, ModelRuntime};

/// Stub runtime for testing and `stub://` models.
///
/// Always returns the same output tensor, laid out `[1, 4 + classes, boxes]`.
pub struct StubRuntime {
    input_size: u32,
    output_shape: Vec<usize>,
    output: Vec<f32>,
    failures_remaining: u32,
    runs: u64,
}

impl StubRuntime {
    /// Runtime whose output holds no scores above zero.
    pub fn empty(input_size: u32, num_classes: usize, num_boxes: usize) -> Self {
        let channels = 4 + num_classes;
        Self {
            input_size,
            output_shape: vec![1, channels, num_boxes],
            output: vec![0.0; channels * num_boxes],
            failures_remaining: 0,
            runs: 0,
        }
    }

    /// Runtime with an explicit output tensor and declared shape.
    ///
    /// The tensor length is not checked against the shape, so tests can
    /// reproduce a model/label mismatch.
    pub fn with_output(input_size: u32, output_shape: Vec<usize>, output: Vec<f32>) -> Self {
        Self {
            input_size,
            output_shape,
            output,
            failures_remaining: 0,
            runs: 0,
        }
    }

    /// Write one center-form candidate (model pixels) into box slot `index`.
    pub fn with_candidate(
        mut self,
        index: usize,
        center: (f32, f32),
        size: (f32, f32),
        class_index: usize,
        score: f32,
    ) -> Self {
        let num_boxes = self.output_shape.last().copied().unwrap_or(0);
        let channels = self.output_shape.iter().rev().nth(1).copied().unwrap_or(0);
        if index < num_boxes && 4 + class_index < channels {
            let values = [center.0, center.1, size.0, size.1];
            for (channel, value) in values.iter().enumerate() {
                self.output[channel * num_boxes + index] = *value;
            }
            self.output[(4 + class_index) * num_boxes + index] = score;
        }
        self
    }

    /// Make the next `count` runs fail.
    pub fn fail_next(mut self, count: u32) -> Self {
        self.failures_remaining = count;
        self
    }

    /// Number of completed runs, failures excluded.
    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl ModelRuntime for StubRuntime {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn delegate(&self) -> Delegate {
        Delegate::Cpu
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let side = self.input_size as usize;
        let expected = side * side * 3;
        if input.len() != expected {
            return Err(anyhow!(
                "expected {} input values, received {}",
                expected,
                input.len()
            ));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(anyhow!("stub runtime failure injected"));
        }
        self.runs += 1;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_is_written_channel_major() {
        let mut runtime = StubRuntime::empty(4, 2, 3).with_candidate(
            1,
            (2.0, 2.0),
            (1.0, 1.0),
            1,
            0.8,
        );
        let out = runtime.run(&[0.0; 48]).unwrap();
        assert_eq!(out.len(), 6 * 3);
        assert_eq!(out[1], 2.0);
        assert_eq!(out[3 + 1], 2.0);
        assert_eq!(out[5 * 3 + 1], 0.8);
        assert_eq!(out[4 * 3 + 1], 0.0);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut runtime = StubRuntime::empty(2, 1, 1).fail_next(1);
        assert!(runtime.run(&[0.0; 12]).is_err());
        assert!(runtime.run(&[0.0; 12]).is_ok());
        assert_eq!(runtime.runs(), 1);
    }

    #[test]
    fn rejects_wrong_input_length() {
        let mut runtime = StubRuntime::empty(2, 1, 1);
        assert!(runtime.run(&[0.0; 5]).is_err());
    }
}
