//! The recorder: orchestrates the recording/playback lifecycle,
//! interception wrapping, key derivation, sampling, and failure
//! isolation.

use crate::cassette::Cassette;
use crate::errors::{OperationError, TapedeckError};
use crate::interception::{
    format_alias, input_interception_key, output_interception_key, serialized_copy, CallArgs,
    CapturePolicy, InputDataHandler, OutputDataHandler,
};
use crate::recording::{
    Recording, DURATION, EXCEPTION_IN_OPERATION, OPERATION_CLASS, OPERATION_OUTPUT_ALIAS,
    RECORDED_AT, STORAGE_FORMAT,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fixed sampling seed, so sampling draws are reproducible run to run.
const SAMPLING_SEED: u64 = 110_613;

/// Per-category recording tuning. Attached to an operation category, not
/// to a single execution.
#[derive(Debug, Clone, Copy)]
pub struct RecordingParameters {
    /// Fraction of completed recordings to persist, in [0, 1].
    pub sampling_rate: f64,
    /// Ignore `force_sample_recording` calls for this category.
    pub ignore_enforced_sampling: bool,
    /// Skip recording for this category altogether.
    pub skipped: bool,
    /// Deep-copy intercepted input values through the serialization
    /// boundary before storing them.
    pub copy_on_intercept: bool,
}

impl Default for RecordingParameters {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            ignore_enforced_sampling: false,
            skipped: false,
            copy_on_intercept: false,
        }
    }
}

/// One captured (key, value) pair, produced during interception and
/// consumed during result extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub key: String,
    pub value: Value,
}

/// Result of replaying a recording: the freshly captured outputs paired
/// with the originally recorded ones, plus timings.
#[derive(Debug, Clone)]
pub struct Playback {
    pub playback_outputs: Vec<Output>,
    pub playback_duration: Duration,
    pub recorded_outputs: Vec<Output>,
    pub recorded_duration: Duration,
    pub original_recording: Recording,
}

/// Configuration of one input interception call site.
pub struct InputInterception {
    alias: String,
    capture: CapturePolicy,
    data_handler: Option<Arc<dyn InputDataHandler>>,
    alias_params_resolver: Option<AliasResolverFn>,
    run_original_when_missing: bool,
}

type AliasResolverFn = Box<dyn Fn(&CallArgs) -> BTreeMap<String, String> + Send + Sync>;

impl InputInterception {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            capture: CapturePolicy::All,
            data_handler: None,
            alias_params_resolver: None,
            run_original_when_missing: false,
        }
    }

    pub fn capture(mut self, policy: CapturePolicy) -> Self {
        self.capture = policy;
        self
    }

    pub fn data_handler(mut self, handler: Arc<dyn InputDataHandler>) -> Self {
        self.data_handler = Some(handler);
        self
    }

    /// Resolve `{param}` placeholders in the alias per invocation, so one
    /// call site yields distinct key namespaces per logical instance.
    pub fn alias_params_resolver(
        mut self,
        resolver: impl Fn(&CallArgs) -> BTreeMap<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.alias_params_resolver = Some(Box::new(resolver));
        self
    }

    /// During playback, fall back to executing the wrapped call when the
    /// interception key is absent instead of failing the playback.
    pub fn run_original_when_missing(mut self, enabled: bool) -> Self {
        self.run_original_when_missing = enabled;
        self
    }
}

/// Configuration of one output interception call site.
pub struct OutputInterception {
    alias: String,
    data_handler: Option<Arc<dyn OutputDataHandler>>,
    fail_on_missing_result: bool,
}

impl OutputInterception {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            data_handler: None,
            fail_on_missing_result: true,
        }
    }

    pub fn data_handler(mut self, handler: Arc<dyn OutputDataHandler>) -> Self {
        self.data_handler = Some(handler);
        self
    }

    /// Tolerate playback of recordings made before this output existed:
    /// return `None` instead of failing when no result was recorded.
    pub fn fail_on_missing_result(mut self, fail: bool) -> Self {
        self.fail_on_missing_result = fail;
        self
    }
}

struct ActiveRecording {
    recording: Recording,
    parameters: RecordingParameters,
    force_sample: bool,
}

struct RecorderInner {
    recording_enabled: bool,
    active: Option<ActiveRecording>,
    playback: Option<Recording>,
    playback_outputs: Vec<Output>,
    invoke_counter: HashMap<String, u64>,
    category_params: HashMap<String, RecordingParameters>,
    sample_rng: StdRng,
    currently_intercepting: bool,
}

/// Records live operation executions and plays them back.
///
/// One recorder instance drives at most one recording (or one playback)
/// at a time; concurrently-executing operations each need their own
/// instance. The recorder is an explicit context object, passed through
/// the call chain rather than held globally.
pub struct Recorder {
    cassette: Arc<dyn Cassette>,
    inner: Mutex<RecorderInner>,
}

impl Recorder {
    pub fn new(cassette: Arc<dyn Cassette>) -> Self {
        Self {
            cassette,
            inner: Mutex::new(RecorderInner {
                recording_enabled: false,
                active: None,
                playback: None,
                playback_outputs: Vec::new(),
                invoke_counter: HashMap::new(),
                category_params: HashMap::new(),
                sample_rng: StdRng::seed_from_u64(SAMPLING_SEED),
                currently_intercepting: false,
            }),
        }
    }

    pub fn cassette(&self) -> &Arc<dyn Cassette> {
        &self.cassette
    }

    /// Enable recording and interception for all wrapped call sites.
    pub fn enable_recording(&self) {
        log::info!("Enabling recording");
        self.lock().recording_enabled = true;
    }

    pub fn disable_recording(&self) {
        log::info!("Disabling recording");
        self.lock().recording_enabled = false;
    }

    /// Register per-category recording parameters.
    pub fn set_recording_parameters(&self, category: &str, parameters: RecordingParameters) {
        self.lock()
            .category_params
            .insert(category.to_string(), parameters);
    }

    pub fn in_recording_mode(&self) -> bool {
        let inner = self.lock();
        inner.recording_enabled && inner.active.is_some()
    }

    pub fn in_playback_mode(&self) -> bool {
        self.lock().playback.is_some()
    }

    /// Id of the recording in the current context, recording or playback.
    pub fn current_recording_id(&self) -> Option<String> {
        let inner = self.lock();
        if inner.recording_enabled {
            if let Some(active) = &inner.active {
                return Some(active.recording.id().to_string());
            }
        }
        inner
            .playback
            .as_ref()
            .map(|recording| recording.id().to_string())
    }

    /// Ensure the currently active recording is persisted regardless of
    /// the sampling draw, unless the category opts out.
    pub fn force_sample_recording(&self) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.as_mut() {
            if active.parameters.ignore_enforced_sampling {
                return;
            }
            log::info!(
                "Recording with id {} sampling is enforced",
                active.recording.id()
            );
            active.force_sample = true;
        }
    }

    pub fn is_recording_sample_forced(&self) -> bool {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.force_sample)
            .unwrap_or(false)
    }

    /// Discards the currently active recording.
    pub fn discard_recording(&self) {
        let discarded = {
            let mut inner = self.lock();
            inner.active.take()
        };
        if let Some(active) = discarded {
            log::info!("Recording with id {} was discarded", active.recording.id());
            if let Err(err) = self.cassette.abort_recording(active.recording) {
                log::warn!("Failed aborting discarded recording: {err}");
            }
        }
    }

    /// Record ad-hoc data under the given key, if in recording mode.
    pub fn record_data(&self, key: &str, value: Value) {
        let mut inner = self.lock();
        if !inner.recording_enabled {
            return;
        }
        if let Some(active) = inner.active.as_mut() {
            log::info!(
                "Recording data for recording id {} under key {}",
                active.recording.id(),
                key
            );
            active.recording.set_data(key, value);
        }
    }

    /// Play back ad-hoc recorded data, or `None` when not in playback.
    pub fn play_data(&self, key: &str) -> Result<Option<Value>, TapedeckError> {
        let inner = self.lock();
        match &inner.playback {
            Some(recording) => recording.get_data(key).map(Some),
            None => Ok(None),
        }
    }

    /// Opens a recording scope for one operation execution: creates a
    /// recording, runs `operation`, and on exit computes post-operation
    /// metadata, evaluates the sampling decision, and aborts or saves.
    ///
    /// Persistence is best-effort: saving failures are logged and
    /// swallowed, never failing the operation's own result.
    pub fn start_recording<T>(
        &self,
        category: &str,
        metadata: Map<String, Value>,
        post_operation_metadata_extractor: Option<
            &dyn Fn() -> Result<Map<String, Value>, TapedeckError>,
        >,
        operation: impl FnOnce() -> Result<T, TapedeckError>,
    ) -> Result<T, TapedeckError> {
        {
            let mut inner = self.lock();
            assert!(
                inner.active.is_none() && inner.playback.is_none(),
                "cannot start recording while another recording or playback is active"
            );
            let recording = self.cassette.create_new_recording(category)?;
            let parameters = inner
                .category_params
                .get(category)
                .copied()
                .unwrap_or_default();
            log::info!(
                "Starting recording for category {category} with id {}",
                recording.id()
            );
            inner.active = Some(ActiveRecording {
                recording,
                parameters,
                force_sample: false,
            });
        }

        let start = Instant::now();
        let result = operation();

        let mut metadata = metadata;
        metadata.insert(
            EXCEPTION_IN_OPERATION.to_string(),
            Value::Bool(result.is_err()),
        );
        self.finish_recording(
            category,
            metadata,
            post_operation_metadata_extractor,
            start.elapsed(),
        );
        result
    }

    fn finish_recording(
        &self,
        category: &str,
        metadata: Map<String, Value>,
        post_operation_metadata_extractor: Option<
            &dyn Fn() -> Result<Map<String, Value>, TapedeckError>,
        >,
        duration: Duration,
    ) {
        let taken = {
            let mut inner = self.lock();
            let taken = inner.active.take();
            inner.invoke_counter.clear();
            if let Some(active) = taken {
                let sampled = Self::should_sample_recording(
                    &mut inner.sample_rng,
                    &active.recording,
                    &active.parameters,
                    active.force_sample,
                );
                Some((active, sampled))
            } else {
                // Recording was discarded mid-operation
                None
            }
        };
        let Some((active, sampled)) = taken else {
            return;
        };

        let mut recording = active.recording;
        if !sampled {
            if let Err(err) = self.cassette.abort_recording(recording) {
                log::warn!("Failed aborting unsampled recording: {err}");
            }
            return;
        }

        let recording_id = recording.id().to_string();
        Self::add_post_operation_metadata(
            &mut recording,
            metadata,
            post_operation_metadata_extractor,
            duration,
        );
        match self.cassette.save_recording(recording) {
            Ok(()) => log::info!(
                "Finished recording of category {category} with id {recording_id}, \
                 recording duration {:.2}",
                duration.as_secs_f64()
            ),
            Err(err) => log::error!(
                "Failed saving recording of category {category} with id {recording_id}: {err}"
            ),
        }
    }

    fn add_post_operation_metadata(
        recording: &mut Recording,
        mut metadata: Map<String, Value>,
        extractor: Option<&dyn Fn() -> Result<Map<String, Value>, TapedeckError>>,
        duration: Duration,
    ) {
        metadata.insert(DURATION.to_string(), json!(duration.as_secs_f64()));
        metadata.insert(
            RECORDED_AT.to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        metadata.insert(STORAGE_FORMAT.to_string(), json!("json"));
        if let Some(extractor) = extractor {
            match extractor() {
                Ok(extra) => {
                    for (key, value) in extra {
                        metadata.insert(key, value);
                    }
                }
                Err(err) => log::error!(
                    "Failed extracting post operation metadata for recording id {}, \
                     skipping metadata extraction: {err}",
                    recording.id()
                ),
            }
        }
        recording.add_metadata(metadata);
    }

    fn should_sample_recording(
        rng: &mut StdRng,
        recording: &Recording,
        parameters: &RecordingParameters,
        force_sample: bool,
    ) -> bool {
        if force_sample {
            return true;
        }
        if parameters.sampling_rate >= 1.0 {
            return true;
        }
        let sample_value: f64 = rng.gen();
        let part_of_sample = sample_value <= parameters.sampling_rate;
        log::info!(
            "Recording id {} sampled = {part_of_sample} - ({sample_value:.3} <= sampling \
             rate:{:.2})?",
            recording.id(),
            parameters.sampling_rate
        );
        part_of_sample
    }

    /// Wraps a value-producing call. In recording mode the call executes
    /// and its result (or failure) is stored under a key derived from the
    /// alias and the captured arguments; in playback mode the stored
    /// value is returned (or the stored failure re-raised) without
    /// invoking the call.
    pub fn intercept_input(
        &self,
        interception: &InputInterception,
        args: &CallArgs,
        call: impl FnOnce() -> Result<Value, OperationError>,
    ) -> Result<Value, TapedeckError> {
        if !self.should_intercept() {
            return run_call(call);
        }

        let in_playback = self.in_playback_mode();
        let key = match format_alias(
            &interception.alias,
            interception.alias_params_resolver.as_ref().map(|r| {
                let resolver: &(dyn Fn(&CallArgs) -> BTreeMap<String, String>) = r.as_ref();
                resolver
            }),
            args,
        )
        .and_then(|alias| input_interception_key(&alias, &interception.capture, args))
        {
            Ok(key) => Some(key),
            Err(err) => {
                let message = format!(
                    "Input interception key creation error for alias '{}' - {err}",
                    interception.alias
                );
                if in_playback {
                    // Fatal: playback cannot resolve the recorded value
                    return Err(TapedeckError::InputKeyCreation(message));
                }
                log::error!("{message}");
                self.discard_recording();
                None
            }
        };

        if in_playback {
            let key = key.unwrap_or_default();
            return match self.playback_recorded_value(&key) {
                Ok(value) => match &interception.data_handler {
                    Some(handler) => handler.restore_input_from_recording(value, args),
                    None => Ok(value),
                },
                Err(TapedeckError::RecordingKey(key))
                    if interception.run_original_when_missing =>
                {
                    log::info!("No recorded value under key '{key}', running original call");
                    self.call_suppressed(call)
                }
                Err(err) => Err(err),
            };
        }

        self.execute_and_record_interception(
            key.as_deref(),
            args,
            interception.data_handler.as_deref(),
            call,
        )
    }

    /// Wraps a side-effecting call whose arguments are the payload. The
    /// arguments are always recorded (keyed by alias plus a per-alias
    /// invocation ordinal); in playback mode the previously recorded
    /// result is returned without invoking the call.
    pub fn intercept_output(
        &self,
        interception: &OutputInterception,
        args: &CallArgs,
        call: impl FnOnce() -> Result<Value, OperationError>,
    ) -> Result<Option<Value>, TapedeckError> {
        if !self.should_intercept() {
            return run_call(call).map(Some);
        }

        // Repeated calls to the same alias within one execution get
        // distinct ordinals, reset at the start of every execution.
        let invocation_number = {
            let mut inner = self.lock();
            let counter = inner
                .invoke_counter
                .entry(interception.alias.clone())
                .or_insert(0);
            *counter += 1;
            *counter
        };

        self.record_output(
            &interception.alias,
            invocation_number,
            args,
            interception.data_handler.as_deref(),
        );

        // Recording the arguments may have failed and discarded the
        // active recording, making interception a no-op
        if !self.should_intercept() {
            return run_call(call).map(Some);
        }

        let result_key = format!(
            "{}.result",
            output_interception_key(&interception.alias, invocation_number)
        );

        if self.in_playback_mode() {
            return match self.playback_recorded_value(&result_key) {
                Ok(value) => Ok(Some(value)),
                Err(TapedeckError::RecordingKey(key)) => {
                    if interception.fail_on_missing_result {
                        Err(TapedeckError::RecordingKey(key))
                    } else {
                        Ok(None)
                    }
                }
                Err(err) => Err(err),
            };
        }

        self.execute_and_record_interception(Some(&result_key), args, None, call)
            .map(Some)
    }

    /// Wraps the operation entry point. In recording mode this opens a
    /// recording scope around the call; in playback mode the scope was
    /// already opened by `play` and the call executes inline. The
    /// operation's own result (or failure capsule) is recorded under the
    /// fixed operation-output alias.
    pub fn operation(
        &self,
        category: &str,
        metadata_extractor: Option<&dyn Fn() -> Result<Map<String, Value>, TapedeckError>>,
        call: impl FnOnce() -> Result<Value, TapedeckError>,
    ) -> Result<Value, TapedeckError> {
        if self.in_playback_mode() {
            return self.execute_operation(call);
        }
        if !self.lock().recording_enabled {
            return call();
        }
        let parameters = self
            .lock()
            .category_params
            .get(category)
            .copied()
            .unwrap_or_default();
        if parameters.skipped {
            return call();
        }

        let mut metadata = Map::new();
        metadata.insert(OPERATION_CLASS.to_string(), json!(category));
        self.start_recording(category, metadata, metadata_extractor, || {
            self.execute_operation(call)
        })
    }

    fn execute_operation(
        &self,
        call: impl FnOnce() -> Result<Value, TapedeckError>,
    ) -> Result<Value, TapedeckError> {
        match call() {
            Ok(result) => {
                self.record_operation_output(result.clone());
                Ok(result)
            }
            Err(TapedeckError::Operation(err)) => {
                let capsule = serde_json::to_value(&err)
                    .unwrap_or_else(|_| json!({"kind": "unknown", "message": err.to_string()}));
                self.record_operation_output(capsule);
                if self.in_playback_mode() {
                    // Captured as a legitimate recorded output of the
                    // played-back operation, not a playback failure
                    Err(TapedeckError::OperationDuringPlayback)
                } else {
                    Err(TapedeckError::Operation(err))
                }
            }
            // Framework errors pass through unrecorded
            Err(err) => Err(err),
        }
    }

    fn record_operation_output(&self, result: Value) {
        self.record_output(
            OPERATION_OUTPUT_ALIAS,
            1,
            &CallArgs::positional(vec![result]),
            None,
        );
    }

    /// Replays the recording: enters playback mode, runs the playback
    /// function against the fetched recording, and pairs the captured
    /// playback outputs with the originally recorded ones.
    pub fn play(
        &self,
        recording_id: &str,
        playback_fn: impl FnOnce(&Recording) -> Result<Value, TapedeckError>,
    ) -> Result<Playback, TapedeckError> {
        let recording = self.cassette.get_recording(recording_id)?;
        {
            let mut inner = self.lock();
            assert!(
                inner.active.is_none() && inner.playback.is_none(),
                "cannot start playback while a recording or playback is active"
            );
            inner.playback = Some(recording.clone());
            inner.playback_outputs.clear();
        }

        let start = Instant::now();
        let result = playback_fn(&recording);
        let playback_duration = start.elapsed();

        let playback_outputs = {
            let mut inner = self.lock();
            inner.playback = None;
            inner.invoke_counter.clear();
            std::mem::take(&mut inner.playback_outputs)
        };

        match result {
            // The played-back operation raised; its failure was captured
            // as an output and belongs to the comparison, not to us
            Ok(_) | Err(TapedeckError::OperationDuringPlayback) => {}
            Err(err) => return Err(err),
        }

        let recorded_duration = recording
            .metadata()
            .get(DURATION)
            .and_then(|value| value.as_f64())
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        let recorded_outputs = Self::extract_recorded_outputs(&recording)?;
        Ok(Playback {
            playback_outputs,
            playback_duration,
            recorded_outputs,
            recorded_duration,
            original_recording: recording,
        })
    }

    /// Top-level recorded outputs: every `output:` key except the
    /// op-internal `.result` sub-keys.
    fn extract_recorded_outputs(recording: &Recording) -> Result<Vec<Output>, TapedeckError> {
        let mut outputs = Vec::new();
        for key in recording.all_keys() {
            if key.starts_with("output:") && !key.ends_with("result") {
                outputs.push(Output {
                    value: recording.get_data(&key)?,
                    key,
                });
            }
        }
        Ok(outputs)
    }

    // ── Interception internals ────────────────────────────────────────────

    fn should_intercept(&self) -> bool {
        let inner = self.lock();
        if inner.currently_intercepting {
            // No interception inside interception (inception)
            return false;
        }
        (inner.recording_enabled && inner.active.is_some()) || inner.playback.is_some()
    }

    /// Reads the tagged value recorded under the key: a stored failure is
    /// re-raised, a stored value is returned.
    fn playback_recorded_value(&self, key: &str) -> Result<Value, TapedeckError> {
        let recorded = {
            let inner = self.lock();
            let playback = inner
                .playback
                .as_ref()
                .ok_or_else(|| TapedeckError::State("not in playback mode".to_string()))?;
            playback.get_data(key)?
        };
        if let Some(exception) = recorded.get("exception") {
            let err: OperationError = serde_json::from_value(exception.clone())
                .map_err(|e| TapedeckError::Serialization(e.to_string()))?;
            return Err(TapedeckError::Operation(err));
        }
        recorded.get("value").cloned().ok_or_else(|| {
            TapedeckError::Serialization(format!("recorded entry under '{key}' has no value"))
        })
    }

    /// Records the arguments sent to an output alias. In playback mode
    /// the capture goes to the playback outputs instead of the recording.
    fn record_output(
        &self,
        alias: &str,
        invocation_number: u64,
        args: &CallArgs,
        data_handler: Option<&dyn OutputDataHandler>,
    ) {
        let key = format!(
            "{}.output",
            output_interception_key(alias, invocation_number)
        );

        let value = match data_handler {
            Some(handler) => match handler.prepare_output_for_recording(&key, args) {
                Ok(value) => value,
                Err(err) => {
                    log::error!(
                        "Prepare output for recording error for interception key '{key}': {err}"
                    );
                    self.discard_recording();
                    return;
                }
            },
            None => json!({
                "args": args.positional,
                "kwargs": args
                    .keyword
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect::<Map<String, Value>>()
            }),
        };

        let mut inner = self.lock();
        if inner.playback.is_some() {
            inner.playback_outputs.push(Output { key, value });
            return;
        }
        if let Some(active) = inner.active.as_mut() {
            log::info!(
                "Recording data for recording id {} under key {key}",
                active.recording.id()
            );
            active.recording.set_data(key, value);
        }
    }

    /// Executes the wrapped call under the re-entrancy suppression flag
    /// and records its result (or failure) under the interception key.
    fn execute_and_record_interception(
        &self,
        key: Option<&str>,
        args: &CallArgs,
        data_handler: Option<&dyn InputDataHandler>,
        call: impl FnOnce() -> Result<Value, OperationError>,
    ) -> Result<Value, TapedeckError> {
        let result = self.call_suppressed(call);

        let Some(key) = key else {
            // Key creation already failed and discarded the recording
            return result;
        };

        match result {
            Err(TapedeckError::Operation(err)) => {
                // Stored tagged as an exception so playback re-raises it
                let capsule = serde_json::to_value(&err)
                    .unwrap_or_else(|_| json!({"kind": "unknown", "message": err.to_string()}));
                self.record_if_active(key, json!({ "exception": capsule }));
                Err(TapedeckError::Operation(err))
            }
            Err(err) => Err(err),
            Ok(result) => {
                let prepared = match data_handler {
                    Some(handler) => {
                        match handler.prepare_input_for_recording(key, &result, args) {
                            Ok(prepared) => prepared,
                            Err(err) => {
                                log::error!(
                                    "Prepare input for recording error for interception key \
                                     '{key}': {err}"
                                );
                                self.discard_recording();
                                return Ok(result);
                            }
                        }
                    }
                    None => result.clone(),
                };
                let copy_on_intercept = self
                    .lock()
                    .active
                    .as_ref()
                    .map(|active| active.parameters.copy_on_intercept)
                    .unwrap_or(false);
                let stored = if copy_on_intercept {
                    match serialized_copy(&prepared) {
                        Ok(copied) => copied,
                        Err(err) => {
                            log::warn!("Recorded data couldn't be copied ({err})");
                            prepared
                        }
                    }
                } else {
                    prepared
                };
                self.record_if_active(key, json!({ "value": stored }));
                Ok(result)
            }
        }
    }

    fn record_if_active(&self, key: &str, value: Value) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.as_mut() {
            log::info!(
                "Recording data for recording id {} under key {key}",
                active.recording.id()
            );
            active.recording.set_data(key, value);
        }
    }

    fn call_suppressed(
        &self,
        call: impl FnOnce() -> Result<Value, OperationError>,
    ) -> Result<Value, TapedeckError> {
        {
            let mut inner = self.lock();
            assert!(
                !inner.currently_intercepting,
                "re-entrant interception must be suppressed by the caller"
            );
            inner.currently_intercepting = true;
        }
        let result = run_call(call);
        self.lock().currently_intercepting = false;
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderInner> {
        self.inner.lock().expect("recorder state lock")
    }
}

fn run_call(call: impl FnOnce() -> Result<Value, OperationError>) -> Result<Value, TapedeckError> {
    call().map_err(TapedeckError::Operation)
}

impl From<OperationError> for TapedeckError {
    fn from(err: OperationError) -> Self {
        TapedeckError::Operation(err)
    }
}

/// Convenience re-export of the metadata key constants alongside the
/// recorder that writes them.
pub mod metadata_keys {
    pub use crate::recording::{
        DURATION, EXCEPTION_IN_OPERATION, OPERATION_CLASS, RECORDED_AT, STORAGE_FORMAT,
    };
}
