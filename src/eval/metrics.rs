//! Accuracy and confusion-matrix scoring.

use crate::data::AnnotationTable;
use crate::error::{Result, VqaError};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Choice labels of a four-option question.
pub const DEFAULT_LABELS: [&str; 4] = ["A", "B", "C", "D"];

/// Fraction of positionally equal pairs. Empty input scores 0.
pub fn accuracy<P, T>(predictions: &[P], ground_truth: &[T]) -> Result<f64>
where
    P: PartialEq<T>,
{
    if predictions.len() != ground_truth.len() {
        return Err(VqaError::invalid(format!(
            "{} predictions but {} ground-truth labels",
            predictions.len(),
            ground_truth.len()
        )));
    }

    if predictions.is_empty() {
        return Ok(0.0);
    }

    let correct = predictions
        .iter()
        .zip(ground_truth)
        .filter(|(p, gt)| *p == *gt)
        .count();
    Ok(correct as f64 / predictions.len() as f64)
}

/// Scores keyed by category (difficulty level, model name), in insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccuracyReport {
    entries: Vec<(String, f64)>,
}

impl AccuracyReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score of a category, keeping its original position if it
    /// was already present.
    pub fn insert(&mut self, category: impl Into<String>, score: f64) {
        let category = category.into();
        match self.entries.iter_mut().find(|(c, _)| *c == category) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((category, score)),
        }
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, s)| *s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(c, s)| (c.as_str(), *s))
    }

    pub fn categories(&self) -> Vec<String> {
        self.entries.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, s)| *s).collect()
    }
}

impl FromIterator<(String, f64)> for AccuracyReport {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut report = Self::new();
        for (category, score) in iter {
            report.insert(category, score);
        }
        report
    }
}

impl Serialize for AccuracyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (category, score) in &self.entries {
            map.serialize_entry(category, score)?;
        }
        map.end()
    }
}

/// Accuracy of each prediction column against one ground-truth column.
///
/// `prediction_columns` pairs a category name with the column holding its
/// predictions; the report keeps that order.
pub fn accuracy_by_category<K, C>(
    table: &AnnotationTable,
    prediction_columns: &[(K, C)],
    truth_column: &str,
) -> Result<AccuracyReport>
where
    K: AsRef<str>,
    C: AsRef<str>,
{
    let truth = table.string_column(truth_column)?;
    let mut report = AccuracyReport::new();

    for (category, column) in prediction_columns {
        let predictions = table.string_column(column.as_ref())?;
        report.insert(category.as_ref(), accuracy(&predictions, &truth)?);
    }

    Ok(report)
}

/// Square count matrix indexed `[true][predicted]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: Vec<String>,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Empty matrix over a label set. Labels must be non-empty and unique.
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        if labels.is_empty() {
            return Err(VqaError::invalid("confusion matrix needs at least one label"));
        }

        let labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(VqaError::invalid(format!("duplicate label '{}'", label)));
            }
        }

        let n = labels.len();
        Ok(Self {
            labels,
            counts: vec![vec![0; n]; n],
        })
    }

    fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Count one pair; returns false (and counts nothing) when either
    /// label is outside the label set.
    pub fn record(&mut self, truth: &str, predicted: &str) -> bool {
        match (self.index_of(truth), self.index_of(predicted)) {
            (Some(t), Some(p)) => {
                self.counts[t][p] += 1;
                true
            }
            _ => false,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Count of items with true label `truth` predicted as `predicted`.
    pub fn get(&self, truth: &str, predicted: &str) -> Option<usize> {
        let t = self.index_of(truth)?;
        let p = self.index_of(predicted)?;
        Some(self.counts[t][p])
    }

    /// Counts for one true label, in label order.
    pub fn row(&self, truth: &str) -> Option<&[usize]> {
        self.index_of(truth).map(|t| self.counts[t].as_slice())
    }

    pub fn counts(&self) -> &[Vec<usize>] {
        &self.counts
    }

    /// Sum of all cells.
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Largest single cell.
    pub fn max_count(&self) -> usize {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }
}

impl Serialize for ConfusionMatrix {
    /// `{true_label: {predicted_label: count}}`
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Row<'a>(&'a [String], &'a [usize]);

        impl Serialize for Row<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (label, count) in self.0.iter().zip(self.1) {
                    map.serialize_entry(label, count)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(self.labels.len()))?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            map.serialize_entry(label, &Row(&self.labels, row))?;
        }
        map.end()
    }
}

/// Build a confusion matrix; pairs with a label outside `labels` are
/// dropped.
pub fn confusion_matrix<P, T, L>(
    predictions: &[P],
    ground_truth: &[T],
    labels: &[L],
) -> Result<ConfusionMatrix>
where
    P: AsRef<str>,
    T: AsRef<str>,
    L: AsRef<str>,
{
    if predictions.len() != ground_truth.len() {
        return Err(VqaError::invalid(format!(
            "{} predictions but {} ground-truth labels",
            predictions.len(),
            ground_truth.len()
        )));
    }

    let mut matrix = ConfusionMatrix::new(labels)?;
    let dropped = predictions
        .iter()
        .zip(ground_truth)
        .filter(|(p, gt)| !matrix.record(gt.as_ref(), p.as_ref()))
        .count();

    if dropped > 0 {
        log::debug!("{} pairs outside the label set were not counted", dropped);
    }
    Ok(matrix)
}
