//! Per-iteration training progress output.

/// Verbosity level for training output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// No output.
    Silent,
    /// Per-iteration progress table.
    #[default]
    Info,
    /// Progress table plus window/reduction diagnostics.
    Debug,
}

/// One row of progress data emitted per training iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationRecord {
    pub iteration: usize,
    pub training_metric: f64,
    /// Validation metric and whether it improved the best seen so far.
    pub validation: Option<(f64, bool)>,
    pub gain: f64,
    pub window: f64,
    pub reduction_factor: f64,
}

/// Writes the training progress table to stdout.
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Print the table header.
    pub fn start_training(&self, metric_name: &str) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        println!("# Training ({metric_name}):");
        println!("# --------------------------");
        println!("# iter. training validation");
        println!("# --------------------------");
    }

    /// Print the metric of the starting weights (iteration 0).
    pub fn log_initial(&self, training_metric: f64, validation_metric: Option<f64>) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        match validation_metric {
            Some(v) => println!("{:7} {:9.4} {:9.4} *", 0, training_metric, v),
            None => println!("{:7} {:9.4}", 0, training_metric),
        }
    }

    /// Print one iteration row; `*` marks a validation improvement.
    pub fn log_iteration(&self, record: &IterationRecord) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        let mut line = format!("{:7} {:9.4}", record.iteration, record.training_metric);
        if let Some((value, improved)) = record.validation {
            line.push_str(&format!(" {:9.4}{}", value, if improved { " *" } else { "  " }));
        }
        if self.verbosity >= Verbosity::Debug {
            line.push_str(&format!(
                " {:9.4} {:8.4} {:8.4}",
                record.gain, record.window, record.reduction_factor
            ));
        }
        println!("{line}");
    }

    /// Report early stopping on validation.
    pub fn log_early_stopping(&self, iteration: usize, failed: usize) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        println!("# early exit at iteration {iteration} after {failed} failed validation checks");
    }

    /// Closing line.
    pub fn finish_training(&self) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        println!("# done");
    }
}
