//! Architecture registry and the trainable classifier interface.
//!
//! Training code only sees [`Classifier`] trait objects built by a named
//! [`Architecture`]; real network backends plug in by registering their own
//! architectures.

pub mod linear;
pub mod mlp;
pub mod ops;

use crate::error::{AutoClassError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub use linear::LinearArchitecture;
pub use mlp::MlpArchitecture;

/// Shape parameters for building a fresh model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_dim: usize,
    pub num_classes: usize,
    pub hidden_units: usize,
    pub weight_decay: f32,
}

/// One named parameter tensor, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }
}

/// Serializable model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub architecture: String,
    pub input_dim: usize,
    pub num_classes: usize,
    pub tensors: Vec<NamedTensor>,
}

impl ModelState {
    /// Look up a tensor by name, checking its shape.
    pub fn tensor(&self, name: &str, shape: &[usize]) -> Result<&NamedTensor> {
        let tensor = self
            .tensors
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| AutoClassError::checkpoint(format!("missing tensor '{name}'")))?;
        let expected: usize = tensor.shape.iter().product();
        if tensor.shape != shape || tensor.data.len() != expected {
            return Err(AutoClassError::checkpoint(format!(
                "tensor '{name}' has shape {:?} with {} values, expected {shape:?}",
                tensor.shape,
                tensor.data.len()
            )));
        }
        Ok(tensor)
    }

    /// Whether every parameter is a finite number.
    pub fn is_finite(&self) -> bool {
        self.tensors
            .iter()
            .all(|t| t.data.iter().all(|v| v.is_finite()))
    }

    /// Leading dimension of a named tensor.
    pub fn rows_of(&self, name: &str) -> Result<usize> {
        self.tensors
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.shape.first().copied())
            .ok_or_else(|| AutoClassError::checkpoint(format!("missing tensor '{name}'")))
    }
}

/// Loss and accuracy of one optimizer step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    /// Sum of per-sample losses.
    pub loss: f64,
    /// Samples whose pre-update prediction was correct.
    pub correct: usize,
    pub size: usize,
}

/// A trainable classifier with a forward pass and a gradient step.
pub trait Classifier: Send + Sync {
    fn architecture(&self) -> &str;

    fn input_dim(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Unnormalized class scores for one input.
    fn forward(&self, input: &[f32]) -> Vec<f32>;

    /// One optimizer step over a mini-batch.
    fn train_batch(&mut self, inputs: &[&[f32]], targets: &[usize], learning_rate: f32)
    -> BatchStats;

    fn state(&self) -> ModelState;
}

/// A named model family that can build fresh models and restore saved ones.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, spec: &ModelSpec, seed: u64) -> Result<Box<dyn Classifier>>;

    fn restore(&self, state: &ModelState) -> Result<Box<dyn Classifier>>;
}

/// Maps architecture names to their implementations.
#[derive(Clone, Default)]
pub struct ArchitectureRegistry {
    architectures: HashMap<String, Arc<dyn Architecture>>,
}

impl ArchitectureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the reference `linear` and `mlp` architectures.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LinearArchitecture));
        registry.register(Arc::new(MlpArchitecture));
        registry
    }

    /// Register an architecture, replacing any with the same name.
    pub fn register(&mut self, architecture: Arc<dyn Architecture>) {
        self.architectures
            .insert(architecture.name().to_string(), architecture);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Architecture>> {
        self.architectures
            .get(name)
            .cloned()
            .ok_or_else(|| AutoClassError::UnknownArchitecture(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.architectures.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.architectures.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail on the first name that is not registered.
    pub fn check_all<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            self.get(name.as_ref())?;
        }
        Ok(())
    }

    /// Rebuild a model from saved state using the architecture it names.
    pub fn restore(&self, state: &ModelState) -> Result<Box<dyn Classifier>> {
        self.get(&state.architecture)?.restore(state)
    }
}

impl std::fmt::Debug for ArchitectureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchitectureRegistry")
            .field("architectures", &self.names())
            .finish()
    }
}
