//! Learning-rate and batch-size policy for one trial.

use autoclass_core::LrSchedule;
use std::f64::consts::PI;

/// Learning rate for 0-based `epoch` out of `total_epochs`.
///
/// The first `warmup_epochs` ramp linearly up to `base`; the schedule then
/// runs over the remaining epochs.
pub fn learning_rate_at(
    base: f64,
    schedule: &LrSchedule,
    warmup_epochs: usize,
    epoch: usize,
    total_epochs: usize,
) -> f64 {
    if epoch < warmup_epochs {
        return base * (epoch + 1) as f64 / (warmup_epochs + 1) as f64;
    }
    let step = epoch - warmup_epochs;
    let span = total_epochs.saturating_sub(warmup_epochs).max(1);
    match schedule {
        LrSchedule::Constant => base,
        LrSchedule::Step { factor, every } => base * factor.powi((step / (*every).max(1)) as i32),
        LrSchedule::Cosine { min_lr } => {
            if span <= 1 {
                return base;
            }
            let progress = step as f64 / (span - 1) as f64;
            min_lr + (base - min_lr) * 0.5 * (1.0 + (PI * progress).cos())
        }
    }
}

/// Mini-batch size actually used: the requested size clamped to the
/// training-set size.
pub fn effective_batch_size(requested: usize, train_len: usize) -> usize {
    requested.clamp(1, train_len.max(1))
}
