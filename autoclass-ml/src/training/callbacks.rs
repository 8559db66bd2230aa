//! Epoch-end training callbacks.

use crate::training::trial::EpochMetrics;

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Trait for training callbacks.
pub trait TrainingCallback: Send {
    /// Called after each epoch's validation pass.
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) -> CallbackAction;
}

/// Stops a trial after `patience` epochs without a strict improvement in
/// validation top-1 accuracy. A patience of zero never stops.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    counter: usize,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            counter: 0,
            best: None,
        }
    }

    pub fn observe(&mut self, val_acc: f64) -> CallbackAction {
        if self.patience == 0 {
            return CallbackAction::Continue;
        }
        match self.best {
            Some(best) if val_acc <= best => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best = Some(val_acc);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl TrainingCallback for EarlyStopping {
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) -> CallbackAction {
        self.observe(metrics.val_top1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping() {
        let mut cb = EarlyStopping::new(2);
        assert_eq!(cb.observe(0.5), CallbackAction::Continue);
        assert_eq!(cb.observe(0.6), CallbackAction::Continue);
        assert_eq!(cb.observe(0.6), CallbackAction::Continue); // tie counts as no improvement
        assert_eq!(cb.observe(0.55), CallbackAction::Stop);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut cb = EarlyStopping::new(2);
        cb.observe(0.5);
        cb.observe(0.4);
        assert_eq!(cb.observe(0.7), CallbackAction::Continue);
        assert_eq!(cb.observe(0.6), CallbackAction::Continue);
    }

    #[test]
    fn test_zero_patience_never_stops() {
        let mut cb = EarlyStopping::new(0);
        for _ in 0..10 {
            assert_eq!(cb.observe(0.1), CallbackAction::Continue);
        }
    }
}
