//! Evaluation of multiple-choice answers.
//!
//! This module provides:
//! - Accuracy, per-category accuracy and confusion matrices
//! - Bar charts, confusion heat maps and sample-image grids rendered to SVG

pub mod metrics;
pub mod plot;

pub use metrics::{
    AccuracyReport, ConfusionMatrix, DEFAULT_LABELS, accuracy, accuracy_by_category,
    confusion_matrix,
};
pub use plot::{
    Figure, plot_accuracy_by_category, plot_accuracy_comparison, plot_confusion_matrix,
    plot_model_comparison, plot_sample_images,
};
