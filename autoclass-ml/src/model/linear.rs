//! Multinomial logistic regression.

use crate::error::{AutoClassError, Result};
use crate::model::ops::{affine, argmax, cross_entropy, glorot, softmax};
use crate::model::{Architecture, BatchStats, Classifier, ModelSpec, ModelState, NamedTensor};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub const NAME: &str = "linear";

/// Builds [`LinearClassifier`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearArchitecture;

impl Architecture for LinearArchitecture {
    fn name(&self) -> &str {
        NAME
    }

    fn build(&self, spec: &ModelSpec, seed: u64) -> Result<Box<dyn Classifier>> {
        if spec.input_dim == 0 || spec.num_classes == 0 {
            return Err(AutoClassError::invalid_input(
                "linear model needs a non-empty input and at least one class",
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(Box::new(LinearClassifier {
            input_dim: spec.input_dim,
            num_classes: spec.num_classes,
            weight: glorot(&mut rng, spec.num_classes, spec.input_dim),
            bias: vec![0.0; spec.num_classes],
            weight_decay: spec.weight_decay,
        }))
    }

    fn restore(&self, state: &ModelState) -> Result<Box<dyn Classifier>> {
        let (d, c) = (state.input_dim, state.num_classes);
        Ok(Box::new(LinearClassifier {
            input_dim: d,
            num_classes: c,
            weight: state.tensor("weight", &[c, d])?.data.clone(),
            bias: state.tensor("bias", &[c])?.data.clone(),
            weight_decay: 0.0,
        }))
    }
}

/// `softmax(W x + b)` trained with plain SGD on cross-entropy.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    input_dim: usize,
    num_classes: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
    weight_decay: f32,
}

impl Classifier for LinearClassifier {
    fn architecture(&self) -> &str {
        NAME
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        affine(&self.weight, &self.bias, input)
    }

    fn train_batch(
        &mut self,
        inputs: &[&[f32]],
        targets: &[usize],
        learning_rate: f32,
    ) -> BatchStats {
        let mut stats = BatchStats::default();
        if inputs.is_empty() {
            return stats;
        }
        let (d, c) = (self.input_dim, self.num_classes);
        let mut grad_w = vec![0.0f32; c * d];
        let mut grad_b = vec![0.0f32; c];

        for (x, &y) in inputs.iter().zip(targets) {
            let probs = softmax(&self.forward(x));
            stats.loss += cross_entropy(&probs, y) as f64;
            if argmax(&probs) == y {
                stats.correct += 1;
            }
            for (k, p) in probs.iter().enumerate() {
                let g = p - if k == y { 1.0 } else { 0.0 };
                grad_b[k] += g;
                for (gw, xi) in grad_w[k * d..(k + 1) * d].iter_mut().zip(x.iter()) {
                    *gw += g * xi;
                }
            }
        }
        stats.size = inputs.len();

        let scale = learning_rate / inputs.len() as f32;
        for (w, g) in self.weight.iter_mut().zip(&grad_w) {
            *w -= scale * g + learning_rate * self.weight_decay * *w;
        }
        for (b, g) in self.bias.iter_mut().zip(&grad_b) {
            *b -= scale * g;
        }
        stats
    }

    fn state(&self) -> ModelState {
        let (d, c) = (self.input_dim, self.num_classes);
        ModelState {
            architecture: NAME.to_string(),
            input_dim: d,
            num_classes: c,
            tensors: vec![
                NamedTensor::new("weight", vec![c, d], self.weight.clone()),
                NamedTensor::new("bias", vec![c], self.bias.clone()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec {
            input_dim: 2,
            num_classes: 2,
            hidden_units: 0,
            weight_decay: 0.0,
        }
    }

    #[test]
    fn test_learns_separable_data() {
        let mut model = LinearArchitecture.build(&spec(), 7).unwrap();
        let xs: Vec<[f32; 2]> = vec![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [0.1, 0.9]];
        let ys = [0, 0, 1, 1];
        let inputs: Vec<&[f32]> = xs.iter().map(|x| x.as_slice()).collect();

        let first = model.train_batch(&inputs, &ys, 0.5);
        for _ in 0..300 {
            model.train_batch(&inputs, &ys, 0.5);
        }
        let last = model.train_batch(&inputs, &ys, 0.5);
        assert!(last.loss < first.loss);
        assert_eq!(last.correct, 4);
        assert_eq!(last.size, 4);
    }

    #[test]
    fn test_build_is_seeded() {
        let a = LinearArchitecture.build(&spec(), 3).unwrap().state();
        let b = LinearArchitecture.build(&spec(), 3).unwrap().state();
        let c = LinearArchitecture.build(&spec(), 4).unwrap().state();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_restore_rejects_wrong_shape() {
        let mut state = LinearArchitecture.build(&spec(), 1).unwrap().state();
        state.num_classes = 3;
        assert!(LinearArchitecture.restore(&state).is_err());
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut model = LinearArchitecture.build(&spec(), 1).unwrap();
        let before = model.state();
        assert_eq!(model.train_batch(&[], &[], 0.1), BatchStats::default());
        assert_eq!(model.state(), before);
    }
}
