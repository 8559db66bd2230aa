//! Immutable labelled image collections and index-based views over them.

use crate::error::{AutoClassError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One image reference with its folder label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub path: PathBuf,
    pub label: String,
    /// Dense class id, or `None` when `label` is not part of the class set.
    pub class_id: Option<usize>,
}

impl Sample {
    pub fn is_known(&self) -> bool {
        self.class_id.is_some()
    }
}

/// An ordered sequence of samples plus the id <-> label mapping.
///
/// Class ids are dense indices into `classes`. Folder-derived datasets order
/// classes lexically by folder name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Build a dataset, checking that class names are unique and that every
    /// known class id is in range and agrees with its label.
    pub fn new(
        root: impl Into<PathBuf>,
        classes: Vec<String>,
        samples: Vec<Sample>,
    ) -> Result<Self> {
        for (i, class) in classes.iter().enumerate() {
            if classes[..i].contains(class) {
                return Err(AutoClassError::data_format(format!(
                    "class '{class}' appears twice"
                )));
            }
        }
        for sample in &samples {
            if let Some(id) = sample.class_id {
                match classes.get(id) {
                    Some(name) if *name == sample.label => {}
                    Some(name) => {
                        return Err(AutoClassError::data_format(format!(
                            "{} is labelled '{}' but class {id} is '{name}'",
                            sample.path.display(),
                            sample.label
                        )));
                    }
                    None => {
                        return Err(AutoClassError::data_format(format!(
                            "class id {id} out of range for {} classes",
                            classes.len()
                        )));
                    }
                }
            }
        }
        Ok(Self {
            root: root.into(),
            classes,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn class_id(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == label)
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.classes.get(id).map(String::as_str)
    }

    /// Number of samples per known class, indexed by class id.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for id in self.samples.iter().filter_map(|s| s.class_id) {
            counts[id] += 1;
        }
        counts
    }

    /// A view covering every sample in order.
    pub fn view(self: &Arc<Self>) -> DatasetView {
        DatasetView {
            dataset: Arc::clone(self),
            indices: (0..self.samples.len()).collect(),
        }
    }

    /// Deterministically split into `(train, validation)` views.
    ///
    /// The same `seed` always yields the same partition. With `stratified`,
    /// each class is shuffled and split on its own and keeps at least one
    /// training sample. When the dataset holds at least two samples the
    /// validation view is never empty; that takes precedence if every class
    /// is a singleton. Both views list indices in ascending order.
    pub fn split(
        self: &Arc<Self>,
        validation_fraction: f64,
        seed: u64,
        stratified: bool,
    ) -> Result<(DatasetView, DatasetView)> {
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(AutoClassError::invalid_input(format!(
                "validation fraction {validation_fraction} is not in (0, 1)"
            )));
        }

        let mut groups: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
        for (idx, sample) in self.samples.iter().enumerate() {
            let key = if stratified { sample.class_id } else { None };
            groups.entry(key).or_default().push(idx);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::with_capacity(self.samples.len());
        let mut validation = Vec::new();
        for members in groups.values_mut() {
            members.shuffle(&mut rng);
            let n = members.len();
            let n_val =
                ((n as f64 * validation_fraction).round() as usize).min(n.saturating_sub(1));
            validation.extend_from_slice(&members[..n_val]);
            train.extend_from_slice(&members[n_val..]);
        }

        if validation.is_empty() && self.samples.len() >= 2 {
            let counts = self.train_counts(&train);
            // Prefer a sample whose class keeps another training example.
            let pos = train
                .iter()
                .position(|&i| match self.samples[i].class_id {
                    Some(id) => counts[id] > 1,
                    None => true,
                })
                .unwrap_or(0);
            validation.push(train.remove(pos));
        }

        train.sort_unstable();
        validation.sort_unstable();
        Ok((
            DatasetView {
                dataset: Arc::clone(self),
                indices: train,
            },
            DatasetView {
                dataset: Arc::clone(self),
                indices: validation,
            },
        ))
    }

    fn train_counts(&self, train: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for id in train.iter().filter_map(|&i| self.samples[i].class_id) {
            counts[id] += 1;
        }
        counts
    }
}

/// A read-only subset of a shared [`Dataset`], addressed by sample index.
#[derive(Debug, Clone)]
pub struct DatasetView {
    dataset: Arc<Dataset>,
    indices: Vec<usize>,
}

impl DatasetView {
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Indices into the underlying dataset.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(dataset index, sample)` pairs in view order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Sample)> + '_ {
        self.indices
            .iter()
            .map(move |&i| (i, &self.dataset.samples[i]))
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.iter().map(|(_, s)| s.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dataset(per_class: &[usize]) -> Arc<Dataset> {
        let classes: Vec<String> = (0..per_class.len()).map(|c| format!("class_{c}")).collect();
        let mut samples = Vec::new();
        for (id, &n) in per_class.iter().enumerate() {
            for k in 0..n {
                samples.push(Sample {
                    path: PathBuf::from(format!("class_{id}/img_{k}.png")),
                    label: classes[id].clone(),
                    class_id: Some(id),
                });
            }
        }
        Arc::new(Dataset::new("/data", classes, samples).unwrap())
    }

    #[test]
    fn test_rejects_mismatched_label() {
        let samples = vec![Sample {
            path: "a.png".into(),
            label: "dog".into(),
            class_id: Some(0),
        }];
        let err = Dataset::new("/d", vec!["cat".into()], samples).unwrap_err();
        assert!(matches!(err, AutoClassError::DataFormat(_)));
    }

    #[test]
    fn test_rejects_out_of_range_id() {
        let samples = vec![Sample {
            path: "a.png".into(),
            label: "cat".into(),
            class_id: Some(3),
        }];
        assert!(Dataset::new("/d", vec!["cat".into()], samples).is_err());
    }

    #[test]
    fn test_split_same_seed_is_identical() {
        let ds = dataset(&[30, 20, 10]);
        let (t1, v1) = ds.split(0.25, 7, true).unwrap();
        let (t2, v2) = ds.split(0.25, 7, true).unwrap();
        assert_eq!(t1.indices(), t2.indices());
        assert_eq!(v1.indices(), v2.indices());
    }

    #[test]
    fn test_split_different_seeds_differ() {
        let ds = dataset(&[50, 50]);
        let (_, v1) = ds.split(0.3, 1, true).unwrap();
        let (_, v2) = ds.split(0.3, 2, true).unwrap();
        assert_ne!(v1.indices(), v2.indices());
    }

    #[test]
    fn test_split_is_stratified() {
        let ds = dataset(&[40, 20]);
        let (train, validation) = ds.split(0.25, 3, true).unwrap();
        let val_counts = validation.iter().fold(vec![0; 2], |mut acc, (_, s)| {
            acc[s.class_id.unwrap()] += 1;
            acc
        });
        assert_eq!(val_counts, vec![10, 5]);
        assert_eq!(train.len() + validation.len(), 60);
    }

    #[test]
    fn test_split_keeps_singleton_class_in_train() {
        let ds = dataset(&[1, 9]);
        let (train, validation) = ds.split(0.5, 0, true).unwrap();
        assert!(train.iter().any(|(_, s)| s.class_id == Some(0)));
        assert!(!validation.is_empty());
    }

    #[test]
    fn test_split_never_empty_validation_for_two_samples() {
        let ds = dataset(&[1, 1]);
        let (train, validation) = ds.split(0.1, 5, true).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(validation.len(), 1);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let ds = dataset(&[4]);
        assert!(ds.split(0.0, 0, true).is_err());
        assert!(ds.split(1.0, 0, false).is_err());
    }

    #[test]
    fn test_class_counts() {
        let ds = dataset(&[3, 0, 2]);
        assert_eq!(ds.class_counts(), vec![3, 0, 2]);
        assert_eq!(ds.class_id("class_2"), Some(2));
        assert_eq!(ds.label(1), Some("class_1"));
    }

    proptest! {
        #[test]
        fn split_is_a_partition(
            per_class in prop::collection::vec(1usize..15, 1..5),
            fraction in 0.05f64..0.95,
            seed in any::<u64>(),
            stratified in any::<bool>(),
        ) {
            let ds = dataset(&per_class);
            let (train, validation) = ds.split(fraction, seed, stratified).unwrap();
            let mut all: Vec<usize> = train
                .indices()
                .iter()
                .chain(validation.indices())
                .copied()
                .collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..ds.len()).collect::<Vec<_>>());

            let (train2, validation2) = ds.split(fraction, seed, stratified).unwrap();
            prop_assert_eq!(train.indices(), train2.indices());
            prop_assert_eq!(validation.indices(), validation2.indices());
            if ds.len() >= 2 {
                prop_assert!(!validation.is_empty());
                prop_assert!(!train.is_empty());
            }
        }
    }
}
