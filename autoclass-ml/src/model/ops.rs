//! Small numeric kernels shared by the reference architectures.

use rand::Rng;
use rand::rngs::StdRng;

/// Numerically stable softmax. Non-finite logits yield NaN probabilities.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Whether `target` is among the `k` highest-scored entries. Entries tied
/// with the target that come before it rank ahead of it.
pub fn in_top_k(scores: &[f32], target: usize, k: usize) -> bool {
    let Some(&t) = scores.get(target) else {
        return false;
    };
    let ahead = scores
        .iter()
        .enumerate()
        .filter(|&(i, &s)| s > t || (s == t && i < target))
        .count();
    ahead < k
}

/// Cross-entropy of a probability vector against a class index.
/// A NaN probability yields a NaN loss.
pub fn cross_entropy(probs: &[f32], target: usize) -> f32 {
    let p = probs[target];
    if p.is_nan() {
        return f32::NAN;
    }
    -(p.max(1e-12)).ln()
}

/// Glorot-uniform initialised `rows x cols` matrix in row-major order.
pub fn glorot(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f32> {
    let limit = (6.0 / (rows + cols).max(1) as f32).sqrt();
    (0..rows * cols)
        .map(|_| rng.gen_range(-limit..=limit))
        .collect()
}

/// `out = W x + b` for a row-major `W` of `b.len()` rows.
pub fn affine(weights: &[f32], bias: &[f32], input: &[f32]) -> Vec<f32> {
    let cols = input.len();
    bias.iter()
        .enumerate()
        .map(|(r, b)| {
            let row = &weights[r * cols..(r + 1) * cols];
            b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>()
        })
        .collect()
}
