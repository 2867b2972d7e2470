use crate::evaluator::{EvaluationResult, ManifestEvaluator};
use gantry_schema::{EvaluationContext, ManifestSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the mock should hand back for every evaluation.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Succeed with this manifest JSON.
    Succeed(String),
    /// The manifest program fails; its output lands in `compiler_output`.
    FailEvaluation(String),
    /// The pipeline itself breaks; the message lands in `error_output`.
    FailInfrastructure(String),
}

/// In-memory evaluator for engine tests. Counts invocations and tracks the
/// highest number of evaluations in flight at once, so tests can assert both
/// cache hits and concurrency bounds.
pub struct MockEvaluator {
    behavior: MockBehavior,
    delay: Option<Duration>,
    evaluations: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockEvaluator {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            evaluations: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(manifest_json: impl Into<String>) -> Self {
        Self::new(MockBehavior::Succeed(manifest_json.into()))
    }

    /// Hold each evaluation open for `delay`, so overlapping submissions
    /// actually overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `evaluate` ran. A cache hit does not increment this.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent evaluations observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ManifestEvaluator for MockEvaluator {
    fn evaluate(&self, _source: &ManifestSource, _context: &EvaluationContext) -> EvaluationResult {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let result = match &self.behavior {
            MockBehavior::Succeed(json) => EvaluationResult {
                manifest_json: Some(json.clone()),
                ..EvaluationResult::default()
            },
            MockBehavior::FailEvaluation(output) => EvaluationResult {
                compiler_output: Some(output.clone()),
                ..EvaluationResult::default()
            },
            MockBehavior::FailInfrastructure(message) => EvaluationResult {
                error_output: Some(message.clone()),
                ..EvaluationResult::default()
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
