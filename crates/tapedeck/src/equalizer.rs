//! The equalizer: replays a stream of recordings against a recyclable
//! worker and classifies how the replayed outputs differ from the
//! recorded ones.

use crate::errors::TapedeckError;
use crate::recorder::{Output, Playback};
use crate::recording::Recording;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the worker polls its task channel for work or cancellation.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How often the driver wakes up while waiting for a result, to notice
/// deadline expiry or worker death.
const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Classification of one recorded-vs-replayed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqualityStatus {
    Equal,
    /// The replay corrected a previously-bad recorded result.
    Fixed,
    Different,
    /// The replay diverges beyond tolerance.
    Failed,
    /// The comparison machinery itself errored; distinct from a genuine
    /// behavioral difference.
    EqualizerFailure,
}

impl EqualityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "Equal",
            Self::Fixed => "Fixed",
            Self::Different => "Different",
            Self::Failed => "Failed",
            Self::EqualizerFailure => "EqualizerFailure",
        }
    }
}

/// Result produced by a comparator, optionally carrying a message and a
/// structured diff.
#[derive(Debug, Clone)]
pub struct ComparatorResult {
    pub status: EqualityStatus,
    pub message: Option<String>,
    pub diff: Option<Value>,
}

impl ComparatorResult {
    pub fn new(status: EqualityStatus) -> Self {
        Self {
            status,
            message: None,
            diff: None,
        }
    }

    pub fn with_message(status: EqualityStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            diff: None,
        }
    }

    pub fn failure_result(recording_id: &str, message: impl fmt::Display) -> Self {
        Self::with_message(
            EqualityStatus::EqualizerFailure,
            format!("Failure playing recording id {recording_id} - {message}"),
        )
    }
}

impl fmt::Display for ComparatorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} - {message}", self.status.as_str()),
            None => write!(f, "{}", self.status.as_str()),
        }
    }
}

/// One evaluated recording id: the comparator verdict, the compared
/// values (when kept), and the playback that produced them.
#[derive(Debug)]
pub struct Comparison {
    pub comparator_result: ComparatorResult,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
    pub expected_is_exception: bool,
    pub actual_is_exception: bool,
    pub playback: Option<Playback>,
    pub recording_id: String,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.comparator_result)
    }
}

/// Execution tuning for a comparison batch.
#[derive(Debug, Clone)]
pub struct CompareExecutionConfig {
    /// Extract and keep the raw recorded/replayed results on each
    /// `Comparison`.
    pub keep_results_in_comparison: bool,
    /// Run play-and-compare in one long-lived dedicated worker instead of
    /// inline, buying crash and leak isolation.
    pub compare_in_dedicated_worker: bool,
    /// Recycle the worker after this many comparisons, bounding state
    /// drift.
    pub worker_recycle_rate: usize,
    /// Wall-clock deadline per comparison in dedicated-worker mode.
    pub compare_timeout: Duration,
}

impl Default for CompareExecutionConfig {
    fn default() -> Self {
        Self {
            keep_results_in_comparison: true,
            compare_in_dedicated_worker: false,
            worker_recycle_rate: 100,
            compare_timeout: Duration::from_secs(60),
        }
    }
}

pub type PlayerFn = Arc<dyn Fn(&str) -> Result<Playback, TapedeckError> + Send + Sync>;
pub type ResultExtractorFn = Arc<dyn Fn(&[Output]) -> Result<Value, TapedeckError> + Send + Sync>;
pub type ComparisonDataExtractorFn = Arc<dyn Fn(&Recording) -> Map<String, Value> + Send + Sync>;
pub type ComparatorFn =
    Arc<dyn Fn(&Value, &Value, &Map<String, Value>) -> ComparatorResult + Send + Sync>;

/// Returns whether an extracted result value is a recorded failure
/// capsule rather than a regular value.
pub fn is_exception_capsule(value: &Value) -> bool {
    value
        .as_object()
        .map(|object| {
            object.len() == 2
                && object.get("kind").is_some_and(Value::is_string)
                && object.get("message").is_some_and(Value::is_string)
        })
        .unwrap_or(false)
}

struct EqualizerCore {
    player: PlayerFn,
    result_extractor: ResultExtractorFn,
    comparison_data_extractor: Option<ComparisonDataExtractorFn>,
    comparator: ComparatorFn,
}

impl EqualizerCore {
    /// Plays one recording and runs the comparator. Every failure of the
    /// player, extractor, or comparator is converted into an
    /// `EqualizerFailure` result; nothing escapes.
    fn play_and_compare(&self, recording_id: &str) -> PlayAndCompare {
        let playback = match (self.player)(recording_id) {
            Ok(playback) => playback,
            Err(err) => {
                return PlayAndCompare {
                    comparator_result: ComparatorResult::failure_result(recording_id, err),
                    playback: None,
                    recorded_is_exception: false,
                    playback_is_exception: false,
                }
            }
        };

        let recorded = (self.result_extractor)(&playback.recorded_outputs);
        let replayed = (self.result_extractor)(&playback.playback_outputs);
        let (recorded, replayed) = match (recorded, replayed) {
            (Ok(recorded), Ok(replayed)) => (recorded, replayed),
            (Err(err), _) | (_, Err(err)) => {
                return PlayAndCompare {
                    comparator_result: ComparatorResult::failure_result(recording_id, err),
                    playback: Some(playback),
                    recorded_is_exception: false,
                    playback_is_exception: false,
                }
            }
        };

        let recorded_is_exception = is_exception_capsule(&recorded);
        let playback_is_exception = is_exception_capsule(&replayed);
        let comparison_data = match &self.comparison_data_extractor {
            Some(extractor) => extractor(&playback.original_recording),
            None => Map::new(),
        };
        let comparator_result = (self.comparator)(&recorded, &replayed, &comparison_data);
        PlayAndCompare {
            comparator_result,
            playback: Some(playback),
            recorded_is_exception,
            playback_is_exception,
        }
    }
}

struct PlayAndCompare {
    comparator_result: ComparatorResult,
    playback: Option<Playback>,
    recorded_is_exception: bool,
    playback_is_exception: bool,
}

/// Replays many recordings and yields one `Comparison` per id.
pub struct Equalizer {
    recording_ids: Vec<String>,
    core: Arc<EqualizerCore>,
    config: CompareExecutionConfig,
}

impl Equalizer {
    pub fn new(
        recording_ids: impl IntoIterator<Item = String>,
        player: PlayerFn,
        result_extractor: ResultExtractorFn,
        comparator: ComparatorFn,
    ) -> Self {
        Self {
            recording_ids: recording_ids.into_iter().collect(),
            core: Arc::new(EqualizerCore {
                player,
                result_extractor,
                comparison_data_extractor: None,
                comparator,
            }),
            config: CompareExecutionConfig::default(),
        }
    }

    /// Extra per-recording context passed to the comparator.
    pub fn with_comparison_data_extractor(mut self, extractor: ComparisonDataExtractorFn) -> Self {
        let core = Arc::get_mut(&mut self.core).expect("equalizer core not yet shared");
        core.comparison_data_extractor = Some(extractor);
        self
    }

    pub fn with_execution_config(mut self, config: CompareExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the comparison lazily: the returned iterator yields exactly
    /// one `Comparison` per input id, in input order, converting every
    /// per-id failure into an `EqualizerFailure` entry.
    pub fn run_comparison(self) -> ComparisonRun {
        ComparisonRun {
            ids: self.recording_ids.into_iter(),
            core: self.core,
            config: self.config,
            counts: StatusCounts::default(),
            iteration: 0,
            worker: None,
            workers_started: 0,
            terminal_logged: false,
            completed: false,
        }
    }
}

/// Per-status running counts for a comparison batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub equal: u64,
    pub fixed: u64,
    pub different: u64,
    pub failed: u64,
    pub equalizer_failures: u64,
}

impl StatusCounts {
    fn increment(&mut self, status: EqualityStatus) {
        match status {
            EqualityStatus::Equal => self.equal += 1,
            EqualityStatus::Fixed => self.fixed += 1,
            EqualityStatus::Different => self.different += 1,
            EqualityStatus::Failed => self.failed += 1,
            EqualityStatus::EqualizerFailure => self.equalizer_failures += 1,
        }
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "comparison stats: (equal - {}, fixed - {}, diff - {}, failed - {}, equalizer \
             failures - {})",
            self.equal, self.fixed, self.different, self.failed, self.equalizer_failures
        )
    }
}

struct CompareWorker {
    task_tx: Sender<String>,
    result_rx: Receiver<PlayAndCompare>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    age: usize,
}

/// Lazy, order-preserving iterator over the comparisons of one batch.
///
/// Running per-status counts are logged every ten iterations and once on
/// termination, whether the batch completed or was dropped early.
pub struct ComparisonRun {
    ids: std::vec::IntoIter<String>,
    core: Arc<EqualizerCore>,
    config: CompareExecutionConfig,
    counts: StatusCounts,
    iteration: u64,
    worker: Option<CompareWorker>,
    workers_started: usize,
    terminal_logged: bool,
    completed: bool,
}

impl ComparisonRun {
    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    /// Number of dedicated workers started so far; with recycle rate `k`
    /// and `n` ids processed this is `ceil(n / k)`.
    pub fn workers_started(&self) -> usize {
        self.workers_started
    }

    fn play_and_compare_within_worker(
        &mut self,
        recording_id: &str,
    ) -> Result<PlayAndCompare, TapedeckError> {
        if !self.config.compare_in_dedicated_worker {
            return Ok(self.core.play_and_compare(recording_id));
        }

        self.create_or_recycle_worker_if_needed();
        let worker = self
            .worker
            .as_ref()
            .expect("dedicated worker exists after creation");
        if worker.task_tx.send(recording_id.to_string()).is_err() {
            self.worker = None;
            return Err(worker_died());
        }

        let deadline = Instant::now() + self.config.compare_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.handle_compare_execution_timeout();
                return Err(TapedeckError::Worker(
                    "timeout while running recording playback and comparison".to_string(),
                ));
            }
            let worker = self
                .worker
                .as_ref()
                .expect("dedicated worker exists while waiting");
            match worker.result_rx.recv_timeout(remaining.min(RESULT_POLL_INTERVAL)) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Timeout) => {
                    if worker.handle.is_finished() {
                        self.worker = None;
                        return Err(worker_died());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker = None;
                    return Err(worker_died());
                }
            }
        }
    }

    fn handle_compare_execution_timeout(&mut self) {
        log::warn!("Waiting for comparison result timed out");
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Relaxed);
            // A worker stuck inside user code cannot be joined without
            // hanging the driver; signal it to stop and detach. The next
            // comparison gets a fresh worker.
            drop(worker);
        }
    }

    fn create_or_recycle_worker_if_needed(&mut self) {
        let needs_recycle = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.age >= self.config.worker_recycle_rate);
        if needs_recycle {
            self.shutdown_worker();
        }
        if self.worker.is_none() {
            self.spawn_worker();
        }
        if let Some(worker) = self.worker.as_mut() {
            worker.age += 1;
        }
    }

    fn spawn_worker(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<String>();
        let (result_tx, result_rx) = mpsc::channel::<PlayAndCompare>();
        let cancel = Arc::new(AtomicBool::new(false));
        // The worker captures its own handles to the player/extractor/
        // comparator closures; the channel pair is the only other state
        // crossing the boundary.
        let core = Arc::clone(&self.core);
        let worker_cancel = Arc::clone(&cancel);
        let handle = std::thread::Builder::new()
            .name("tapedeck-compare-worker".to_string())
            .spawn(move || worker_loop(&core, &task_rx, &result_tx, &worker_cancel))
            .expect("failed to start compare worker");
        self.worker = Some(CompareWorker {
            task_tx,
            result_rx,
            cancel,
            handle,
            age: 0,
        });
        self.workers_started += 1;
        log::info!("Started compare worker #{}", self.workers_started);
    }

    /// Cleanly stops and joins the current worker.
    fn shutdown_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Relaxed);
            drop(worker.task_tx);
            drop(worker.result_rx);
            if worker.handle.join().is_err() {
                log::warn!("Compare worker panicked during shutdown");
            }
        }
    }

    fn log_terminal_stats(&mut self) {
        if self.terminal_logged {
            return;
        }
        self.terminal_logged = true;
        let prefix = if self.completed {
            "Completed all"
        } else {
            "Terminated early, executed"
        };
        log::info!("{prefix} {} iterations, {}", self.iteration, self.counts);
    }
}

impl Iterator for ComparisonRun {
    type Item = Comparison;

    fn next(&mut self) -> Option<Comparison> {
        let Some(recording_id) = self.ids.next() else {
            self.completed = true;
            self.shutdown_worker();
            self.log_terminal_stats();
            return None;
        };
        self.iteration += 1;

        let comparison = match self.play_and_compare_within_worker(&recording_id) {
            Ok(result) => {
                let (expected, actual) = if self.config.keep_results_in_comparison {
                    match &result.playback {
                        Some(playback) => (
                            (self.core.result_extractor)(&playback.recorded_outputs).ok(),
                            (self.core.result_extractor)(&playback.playback_outputs).ok(),
                        ),
                        None => (None, None),
                    }
                } else {
                    (None, None)
                };
                Comparison {
                    comparator_result: result.comparator_result,
                    expected,
                    actual,
                    expected_is_exception: result.recorded_is_exception,
                    actual_is_exception: result.playback_is_exception,
                    playback: result.playback,
                    recording_id,
                }
            }
            Err(err) => Comparison {
                comparator_result: ComparatorResult::failure_result(&recording_id, err),
                expected: None,
                actual: None,
                expected_is_exception: false,
                actual_is_exception: false,
                playback: None,
                recording_id,
            },
        };

        self.counts.increment(comparison.comparator_result.status);
        log::info!(
            "Recording {} Comparison result: {comparison}",
            comparison.recording_id
        );
        if self.iteration % 10 == 0 {
            log::info!("Iteration {} {}", self.iteration, self.counts);
        }
        Some(comparison)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl Drop for ComparisonRun {
    fn drop(&mut self) {
        self.shutdown_worker();
        self.log_terminal_stats();
    }
}

fn worker_died() -> TapedeckError {
    TapedeckError::Worker("compare worker has died".to_string())
}

fn worker_loop(
    core: &EqualizerCore,
    task_rx: &Receiver<String>,
    result_tx: &Sender<PlayAndCompare>,
    cancel: &AtomicBool,
) {
    while !cancel.load(Ordering::Relaxed) {
        match task_rx.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(recording_id) => {
                let result = core.play_and_compare(&recording_id);
                if result_tx.send(result).is_err() {
                    break;
                }
            }
            // Expected to happen regularly while idle
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OperationError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn playback_with_results(recorded: Value, replayed: Value) -> Playback {
        Playback {
            playback_outputs: vec![Output {
                key: "output: op #1.output".to_string(),
                value: json!({ "args": [replayed] }),
            }],
            playback_duration: Duration::from_millis(1),
            recorded_outputs: vec![Output {
                key: "output: op #1.output".to_string(),
                value: json!({ "args": [recorded] }),
            }],
            recorded_duration: Duration::from_millis(1),
            original_recording: Recording::new("category"),
        }
    }

    fn first_arg_extractor() -> ResultExtractorFn {
        Arc::new(|outputs: &[Output]| {
            outputs
                .first()
                .map(|output| output.value["args"][0].clone())
                .ok_or_else(|| TapedeckError::State("no outputs captured".to_string()))
        })
    }

    fn tolerance_comparator() -> ComparatorFn {
        Arc::new(|recorded: &Value, replayed: &Value, _extra: &Map<String, Value>| {
            let (recorded, replayed) = match (recorded.as_f64(), replayed.as_f64()) {
                (Some(recorded), Some(replayed)) => (recorded, replayed),
                _ => {
                    return ComparatorResult::with_message(
                        EqualityStatus::Different,
                        "type mismatch",
                    )
                }
            };
            let diff = (recorded - replayed).abs();
            if diff == 0.0 {
                ComparatorResult::new(EqualityStatus::Equal)
            } else if diff <= 10.0 {
                ComparatorResult::new(EqualityStatus::Different)
            } else {
                ComparatorResult::new(EqualityStatus::Failed)
            }
        })
    }

    fn doubling_player() -> PlayerFn {
        Arc::new(|recording_id: &str| {
            let value: f64 = recording_id
                .parse()
                .map_err(|_| TapedeckError::NoSuchRecording(recording_id.to_string()))?;
            Ok(playback_with_results(json!(value), json!(value * 2.0)))
        })
    }

    fn run(equalizer: Equalizer) -> (Vec<Comparison>, StatusCounts, usize) {
        let mut run = equalizer.run_comparison();
        let mut comparisons = Vec::new();
        for comparison in run.by_ref() {
            comparisons.push(comparison);
        }
        (comparisons, run.counts(), run.workers_started())
    }

    #[test]
    fn yields_one_comparison_per_id_in_order() {
        let ids = vec!["1".to_string(), "2".to_string(), "bogus".to_string()];
        let equalizer = Equalizer::new(
            ids.clone(),
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        );
        let (comparisons, counts, _) = run(equalizer);
        assert_eq!(comparisons.len(), 3);
        let listed: Vec<&str> = comparisons
            .iter()
            .map(|comparison| comparison.recording_id.as_str())
            .collect();
        assert_eq!(listed, vec!["1", "2", "bogus"]);
        assert_eq!(
            comparisons[2].comparator_result.status,
            EqualityStatus::EqualizerFailure
        );
        assert_eq!(counts.equalizer_failures, 1);
    }

    #[test]
    fn keeps_expected_and_actual_results_when_configured() {
        let equalizer = Equalizer::new(
            vec!["3".to_string()],
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        );
        let (comparisons, _, _) = run(equalizer);
        assert_eq!(comparisons[0].expected, Some(json!(3.0)));
        assert_eq!(comparisons[0].actual, Some(json!(6.0)));

        let equalizer = Equalizer::new(
            vec!["3".to_string()],
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        )
        .with_execution_config(CompareExecutionConfig {
            keep_results_in_comparison: false,
            ..CompareExecutionConfig::default()
        });
        let (comparisons, _, _) = run(equalizer);
        assert_eq!(comparisons[0].expected, None);
        assert_eq!(comparisons[0].actual, None);
    }

    #[test]
    fn tolerance_comparator_classifies_divergence() {
        let player: PlayerFn = Arc::new(|recording_id: &str| {
            let multiplier: f64 = recording_id.parse().unwrap_or(1.0);
            Ok(playback_with_results(json!(3.0), json!(3.0 * multiplier)))
        });
        let equalizer = Equalizer::new(
            vec!["1".to_string(), "2".to_string(), "100".to_string()],
            player,
            first_arg_extractor(),
            tolerance_comparator(),
        );
        let (comparisons, counts, _) = run(equalizer);
        assert_eq!(comparisons[0].comparator_result.status, EqualityStatus::Equal);
        assert_eq!(
            comparisons[1].comparator_result.status,
            EqualityStatus::Different
        );
        assert_eq!(comparisons[2].comparator_result.status, EqualityStatus::Failed);
        assert_eq!(
            counts,
            StatusCounts {
                equal: 1,
                different: 1,
                failed: 1,
                ..StatusCounts::default()
            }
        );
    }

    #[test]
    fn comparison_data_extractor_feeds_comparator() {
        let player: PlayerFn =
            Arc::new(|_id: &str| Ok(playback_with_results(json!(1.0), json!(1.0))));
        let comparator: ComparatorFn =
            Arc::new(|_recorded: &Value, _replayed: &Value, extra: &Map<String, Value>| {
                assert_eq!(extra["category"], json!("category"));
                ComparatorResult::new(EqualityStatus::Equal)
            });
        let extractor: ComparisonDataExtractorFn = Arc::new(|recording: &Recording| {
            let mut extra = Map::new();
            extra.insert("category".to_string(), json!(recording.category()));
            extra
        });
        let equalizer = Equalizer::new(
            vec!["a".to_string()],
            player,
            first_arg_extractor(),
            comparator,
        )
        .with_comparison_data_extractor(extractor);
        let (comparisons, _, _) = run(equalizer);
        assert_eq!(comparisons[0].comparator_result.status, EqualityStatus::Equal);
    }

    #[test]
    fn exception_capsules_set_exception_flags() {
        let capsule = json!({"kind": "ValueError", "message": "boom"});
        let player: PlayerFn = {
            let capsule = capsule.clone();
            Arc::new(move |_id: &str| Ok(playback_with_results(capsule.clone(), json!(5.0))))
        };
        let comparator: ComparatorFn = Arc::new(|_recorded, _replayed, _extra| {
            ComparatorResult::new(EqualityStatus::Fixed)
        });
        let equalizer = Equalizer::new(
            vec!["a".to_string()],
            player,
            first_arg_extractor(),
            comparator,
        );
        let (comparisons, counts, _) = run(equalizer);
        assert!(comparisons[0].expected_is_exception);
        assert!(!comparisons[0].actual_is_exception);
        assert_eq!(counts.fixed, 1);
        assert!(is_exception_capsule(&capsule));
        assert!(!is_exception_capsule(&json!({"kind": "x"})));
    }

    fn dedicated_config(recycle_rate: usize, timeout: Duration) -> CompareExecutionConfig {
        CompareExecutionConfig {
            compare_in_dedicated_worker: true,
            worker_recycle_rate: recycle_rate,
            compare_timeout: timeout,
            ..CompareExecutionConfig::default()
        }
    }

    #[test]
    fn dedicated_worker_mode_produces_same_classifications() {
        let ids: Vec<String> = vec!["1".to_string(), "2".to_string(), "bogus".to_string()];
        let equalizer = Equalizer::new(
            ids,
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        )
        .with_execution_config(dedicated_config(100, Duration::from_secs(10)));
        let (comparisons, counts, workers_started) = run(equalizer);
        assert_eq!(comparisons.len(), 3);
        assert_eq!(counts.equalizer_failures, 1);
        assert_eq!(workers_started, 1);
    }

    #[test]
    fn worker_is_recycled_at_configured_rate() {
        let ids: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        let equalizer = Equalizer::new(
            ids,
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        )
        .with_execution_config(dedicated_config(2, Duration::from_secs(10)));
        let (comparisons, _, workers_started) = run(equalizer);
        assert_eq!(comparisons.len(), 20);
        assert_eq!(workers_started, 10);
    }

    #[test]
    fn timed_out_comparison_is_a_failure_and_batch_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let player: PlayerFn = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_id: &str| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::thread::sleep(Duration::from_secs(2));
                }
                Ok(playback_with_results(json!(1.0), json!(1.0)))
            })
        };
        let equalizer = Equalizer::new(
            vec!["slow".to_string(), "fast".to_string()],
            player,
            first_arg_extractor(),
            tolerance_comparator(),
        )
        .with_execution_config(dedicated_config(100, Duration::from_millis(200)));
        let (comparisons, counts, workers_started) = run(equalizer);
        assert_eq!(comparisons.len(), 2);
        assert_eq!(
            comparisons[0].comparator_result.status,
            EqualityStatus::EqualizerFailure
        );
        assert!(comparisons[0]
            .comparator_result
            .message
            .as_deref()
            .is_some_and(|message| message.contains("equalizer worker error")
                && message.contains("timeout")));
        assert_eq!(comparisons[1].comparator_result.status, EqualityStatus::Equal);
        assert_eq!(counts.equalizer_failures, 1);
        // The timed-out worker was replaced by a fresh one
        assert_eq!(workers_started, 2);
    }

    #[test]
    fn worker_death_aborts_only_the_in_flight_comparison() {
        let player: PlayerFn = Arc::new(|recording_id: &str| {
            if recording_id == "crash" {
                panic!("player crashed");
            }
            Ok(playback_with_results(json!(1.0), json!(1.0)))
        });
        let equalizer = Equalizer::new(
            vec!["ok-1".to_string(), "crash".to_string(), "ok-2".to_string()],
            player,
            first_arg_extractor(),
            tolerance_comparator(),
        )
        .with_execution_config(dedicated_config(100, Duration::from_secs(10)));
        let (comparisons, counts, workers_started) = run(equalizer);
        assert_eq!(comparisons.len(), 3);
        assert_eq!(comparisons[0].comparator_result.status, EqualityStatus::Equal);
        assert_eq!(
            comparisons[1].comparator_result.status,
            EqualityStatus::EqualizerFailure
        );
        assert!(comparisons[1]
            .comparator_result
            .message
            .as_deref()
            .is_some_and(|message| message.contains("equalizer worker error")));
        assert_eq!(comparisons[2].comparator_result.status, EqualityStatus::Equal);
        assert_eq!(counts.equalizer_failures, 1);
        assert_eq!(workers_started, 2);
    }

    #[test]
    fn empty_id_sequence_completes_without_worker() {
        let equalizer = Equalizer::new(
            Vec::<String>::new(),
            doubling_player(),
            first_arg_extractor(),
            tolerance_comparator(),
        );
        let (comparisons, counts, workers_started) = run(equalizer);
        assert!(comparisons.is_empty());
        assert_eq!(counts, StatusCounts::default());
        assert_eq!(workers_started, 0);
    }

    #[test]
    fn failure_result_mentions_recording_id() {
        let result = ComparatorResult::failure_result(
            "rec-1",
            OperationError::new("Timeout", "too slow"),
        );
        assert_eq!(result.status, EqualityStatus::EqualizerFailure);
        assert!(result
            .message
            .as_deref()
            .is_some_and(|message| message.contains("rec-1")));
    }
}
