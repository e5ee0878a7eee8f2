//! Binary classification metrics.
//!
//! Conventions follow the common scientific Python defaults: a precision or
//! recall with an empty denominator is 0, the standard deviation of fold
//! scores is the population one, and ROC AUC ranks tied scores by their
//! average rank.

use crate::types::{ClassMetrics, ClassificationReport};

/// Fraction of matching labels. 0 for empty input.
pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Precision, recall and F1 of `class` treated as positive.
fn class_metrics(y_true: &[u8], y_pred: &[u8], class: u8) -> ClassMetrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassMetrics {
        precision,
        recall,
        f1_score,
        support: tp + fn_,
    }
}

/// F1 score of the positive class (label 1).
pub fn f1_score(y_true: &[u8], y_pred: &[u8]) -> f64 {
    class_metrics(y_true, y_pred, 1).f1_score
}

/// Area under the ROC curve from class-1 scores.
///
/// Returns `None` when only one class is present in `y_true`.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|&&t| t == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Mann-Whitney U with average ranks for ties
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Per-class and averaged precision/recall/F1.
pub fn classification_report(y_true: &[u8], y_pred: &[u8]) -> ClassificationReport {
    let healthy = class_metrics(y_true, y_pred, 0);
    let affected = class_metrics(y_true, y_pred, 1);
    let total = healthy.support + affected.support;

    let macro_avg = ClassMetrics {
        precision: (healthy.precision + affected.precision) / 2.0,
        recall: (healthy.recall + affected.recall) / 2.0,
        f1_score: (healthy.f1_score + affected.f1_score) / 2.0,
        support: total,
    };

    let weighted = |f: fn(&ClassMetrics) -> f64| {
        if total == 0 {
            0.0
        } else {
            (f(&healthy) * healthy.support as f64 + f(&affected) * affected.support as f64)
                / total as f64
        }
    };
    let weighted_avg = ClassMetrics {
        precision: weighted(|m| m.precision),
        recall: weighted(|m| m.recall),
        f1_score: weighted(|m| m.f1_score),
        support: total,
    };

    ClassificationReport {
        healthy,
        affected,
        accuracy: accuracy(y_true, y_pred),
        macro_avg,
        weighted_avg,
    }
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
