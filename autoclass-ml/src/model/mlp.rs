//! One-hidden-layer perceptron with ReLU activation.

use crate::error::{AutoClassError, Result};
use crate::model::ops::{affine, argmax, cross_entropy, glorot, softmax};
use crate::model::{Architecture, BatchStats, Classifier, ModelSpec, ModelState, NamedTensor};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub const NAME: &str = "mlp";

#[derive(Debug, Clone, Copy, Default)]
pub struct MlpArchitecture;

impl Architecture for MlpArchitecture {
    fn name(&self) -> &str {
        NAME
    }

    fn build(&self, spec: &ModelSpec, seed: u64) -> Result<Box<dyn Classifier>> {
        if spec.input_dim == 0 || spec.num_classes == 0 || spec.hidden_units == 0 {
            return Err(AutoClassError::invalid_input(
                "mlp needs non-empty input, hidden and output layers",
            ));
        }
        let (d, h, c) = (spec.input_dim, spec.hidden_units, spec.num_classes);
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(Box::new(MlpClassifier {
            input_dim: d,
            hidden: h,
            num_classes: c,
            w1: glorot(&mut rng, h, d),
            b1: vec![0.0; h],
            w2: glorot(&mut rng, c, h),
            b2: vec![0.0; c],
            weight_decay: spec.weight_decay,
        }))
    }

    fn restore(&self, state: &ModelState) -> Result<Box<dyn Classifier>> {
        let (d, c) = (state.input_dim, state.num_classes);
        let h = state.rows_of("hidden.weight")?;
        Ok(Box::new(MlpClassifier {
            input_dim: d,
            hidden: h,
            num_classes: c,
            w1: state.tensor("hidden.weight", &[h, d])?.data.clone(),
            b1: state.tensor("hidden.bias", &[h])?.data.clone(),
            w2: state.tensor("output.weight", &[c, h])?.data.clone(),
            b2: state.tensor("output.bias", &[c])?.data.clone(),
            weight_decay: 0.0,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct MlpClassifier {
    input_dim: usize,
    hidden: usize,
    num_classes: usize,
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
    weight_decay: f32,
}

impl MlpClassifier {
    fn hidden_activations(&self, input: &[f32]) -> Vec<f32> {
        affine(&self.w1, &self.b1, input)
            .into_iter()
            .map(|v| v.max(0.0))
            .collect()
    }
}

impl Classifier for MlpClassifier {
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
        affine(&self.w2, &self.b2, &self.hidden_activations(input))
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
        let (d, h, c) = (self.input_dim, self.hidden, self.num_classes);
        let mut g_w1 = vec![0.0f32; h * d];
        let mut g_b1 = vec![0.0f32; h];
        let mut g_w2 = vec![0.0f32; c * h];
        let mut g_b2 = vec![0.0f32; c];

        for (x, &y) in inputs.iter().zip(targets) {
            let hidden = self.hidden_activations(x);
            let probs = softmax(&affine(&self.w2, &self.b2, &hidden));
            stats.loss += cross_entropy(&probs, y) as f64;
            if argmax(&probs) == y {
                stats.correct += 1;
            }

            let mut g_hidden = vec![0.0f32; h];
            for (k, p) in probs.iter().enumerate() {
                let g = p - if k == y { 1.0 } else { 0.0 };
                g_b2[k] += g;
                let row = &self.w2[k * h..(k + 1) * h];
                for j in 0..h {
                    g_w2[k * h + j] += g * hidden[j];
                    g_hidden[j] += g * row[j];
                }
            }
            for j in 0..h {
                if hidden[j] <= 0.0 {
                    continue;
                }
                let g = g_hidden[j];
                g_b1[j] += g;
                for (gw, xi) in g_w1[j * d..(j + 1) * d].iter_mut().zip(x.iter()) {
                    *gw += g * xi;
                }
            }
        }
        stats.size = inputs.len();

        let scale = learning_rate / inputs.len() as f32;
        let decay = learning_rate * self.weight_decay;
        for (w, g) in self.w1.iter_mut().zip(&g_w1) {
            *w -= scale * g + decay * *w;
        }
        for (w, g) in self.w2.iter_mut().zip(&g_w2) {
            *w -= scale * g + decay * *w;
        }
        for (b, g) in self.b1.iter_mut().zip(&g_b1) {
            *b -= scale * g;
        }
        for (b, g) in self.b2.iter_mut().zip(&g_b2) {
            *b -= scale * g;
        }
        stats
    }

    fn state(&self) -> ModelState {
        let (d, h, c) = (self.input_dim, self.hidden, self.num_classes);
        ModelState {
            architecture: NAME.to_string(),
            input_dim: d,
            num_classes: c,
            tensors: vec![
                NamedTensor::new("hidden.weight", vec![h, d], self.w1.clone()),
                NamedTensor::new("hidden.bias", vec![h], self.b1.clone()),
                NamedTensor::new("output.weight", vec![c, h], self.w2.clone()),
                NamedTensor::new("output.bias", vec![c], self.b2.clone()),
            ],
        }
    }
}
