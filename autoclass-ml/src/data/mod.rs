//! Dataset loading, splitting and feature decoding.

pub mod dataset;
pub mod features;
pub mod folder;
pub mod source;

pub use dataset::{Dataset, DatasetView, Sample};
pub use features::{FeatureTable, ImageDecoder, ImageLoader};
pub use folder::{DatasetSplits, ImageFolder, is_image_file};
pub use source::{DatasetFetcher, DatasetSource};
