#![forbid(unsafe_code)]

//! Runs generation properties on a `proptest` [`TestRunner`] and records
//! each run: settings, discard accounting, deadlines, reproduction blobs and
//! the structured generation log.
//!
//! Every trial draws a fresh 64-bit seed from the runner and hands the body a
//! [`DeterministicRng`] built from it. That seed is the reproduction blob.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fhs_random::{DeterministicRng, derive_seed, seed_from_label};
use proptest::arbitrary::any;
use proptest::strategy::{Just, Strategy};
use proptest::test_runner::{
    Config, RngAlgorithm, TestCaseError, TestError, TestRng, TestRunner,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const DEFAULT_MAX_EXAMPLES: usize = 20;
pub const DEFAULT_MAX_DISCARD_RATIO: usize = 10;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
pub const GENERATION_LOG_ENV: &str = "FHS_GENERATION_LOG_PATH";

pub const RUNTIME_REASON_CODES: [&str; 6] = [
    "trial_passed",
    "trial_discarded",
    "trial_panicked",
    "property_unsatisfiable",
    "reproduction_blob_invalid",
    "generation_log_write_failed",
];

static GENERATION_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// Seed derived from the property name, so every run is identical.
    Derandomized,
    /// Explicit seed for exploratory runs.
    Seeded(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub max_examples: usize,
    pub max_discard_ratio: usize,
    pub deadline: Option<Duration>,
    pub seed: SeedMode,
    pub reproduce: Option<String>,
    pub print_blob: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_examples: DEFAULT_MAX_EXAMPLES,
            max_discard_ratio: DEFAULT_MAX_DISCARD_RATIO,
            deadline: Some(DEFAULT_DEADLINE),
            seed: SeedMode::Derandomized,
            reproduce: None,
            print_blob: true,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = SeedMode::Seeded(seed);
        self
    }

    #[must_use]
    pub fn with_reproduce(mut self, blob: impl Into<String>) -> Self {
        self.reproduce = Some(blob.into());
        self
    }

    #[must_use]
    pub fn discard_budget(&self) -> usize {
        self.max_examples.saturating_mul(self.max_discard_ratio)
    }

    /// The runner configuration: one case per example, the discard budget as
    /// the global reject limit, and no on-disk failure persistence (the
    /// reproduction blob replaces it).
    #[must_use]
    pub fn proptest_config(&self) -> Config {
        let mut config = Config::with_cases(saturating_u32(self.max_examples));
        config.max_global_rejects = saturating_u32(self.discard_budget());
        config.failure_persistence = None;
        config
    }

    fn base_seed(&self, property: &str) -> u64 {
        match self.seed {
            SeedMode::Derandomized => seed_from_label(property),
            SeedMode::Seeded(seed) => seed,
        }
    }
}

/// "Abandon this trial and draw a fresh one." Never a test failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardSignal {
    pub reason: String,
}

impl DiscardSignal {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DiscardSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trial discarded: {}", self.reason)
    }
}

impl std::error::Error for DiscardSignal {}

/// Discards the current trial unless `condition` holds.
pub fn assume(condition: bool, reason: &str) -> Result<(), DiscardSignal> {
    if condition {
        Ok(())
    } else {
        Err(DiscardSignal::new(reason))
    }
}

/// What the search loop needs to know about an error a trial returned.
pub trait TrialFailure: fmt::Display {
    fn is_discard(&self) -> bool;
    fn reason_code(&self) -> &'static str;
}

impl TrialFailure for DiscardSignal {
    fn is_discard(&self) -> bool {
        true
    }

    fn reason_code(&self) -> &'static str {
        "trial_discarded"
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// The runner's RNG for a run, expanded from its base seed.
fn runner_rng(base_seed: u64) -> TestRng {
    let mut seed = [0u8; 32];
    for (lane, chunk) in (0u64..).zip(seed.chunks_exact_mut(8)) {
        chunk.copy_from_slice(&derive_seed(base_seed, lane).to_be_bytes());
    }
    TestRng::from_seed(RngAlgorithm::ChaCha, &seed)
}

/// The per-trial seed that regenerates one trial exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReproductionBlob {
    pub trial_seed: u64,
}

impl ReproductionBlob {
    #[must_use]
    pub fn encode(self) -> String {
        BASE64.encode(self.trial_seed.to_be_bytes())
    }

    pub fn decode(blob: &str) -> Result<Self, RuntimeError> {
        let bytes = BASE64
            .decode(blob.trim())
            .map_err(|err| RuntimeError::InvalidBlob(format!("base64 decode failed: {err}")))?;
        let word: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            RuntimeError::InvalidBlob(format!("expected 8 bytes, got {}", bytes.len()))
        })?;
        Ok(Self {
            trial_seed: u64::from_be_bytes(word),
        })
    }

    /// The generator this trial draws from.
    #[must_use]
    pub fn rng(self) -> DeterministicRng {
        DeterministicRng::new(self.trial_seed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Passed,
    Discarded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialEvent {
    pub trial: u64,
    pub outcome: TrialOutcome,
    pub reason_code: &'static str,
    pub draws: u64,
    pub note: String,
}

#[derive(Debug, Default, Clone)]
pub struct EvidenceLedger {
    events: Vec<TrialEvent>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: TrialEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[TrialEvent] {
        &self.events
    }

    #[must_use]
    pub fn last(&self) -> Option<&TrialEvent> {
        self.events.last()
    }

    #[must_use]
    pub fn count(&self, outcome: TrialOutcome) -> usize {
        self.events.iter().filter(|e| e.outcome == outcome).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxExamples,
    Deadline,
    DiscardBudget,
    Reproduced,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub property: String,
    pub base_seed: u64,
    pub passed: usize,
    pub discarded: usize,
    pub stop: StopReason,
    pub duration: Duration,
    pub ledger: EvidenceLedger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFailure {
    pub property: String,
    pub trial: u64,
    pub blob: ReproductionBlob,
    pub reason_code: &'static str,
    pub message: String,
    pub print_blob: bool,
}

impl fmt::Display for PropertyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "property {} failed on trial {} [{}]: {}",
            self.property, self.trial, self.reason_code, self.message
        )?;
        if self.print_blob {
            write!(f, "\nreproduce with blob {}", self.blob.encode())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    Failed(Box<PropertyFailure>),
    Unsatisfiable { property: String, discarded: usize },
    InvalidBlob(String),
}

impl RuntimeError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Failed(failure) => failure.reason_code,
            Self::Unsatisfiable { .. } => "property_unsatisfiable",
            Self::InvalidBlob(_) => "reproduction_blob_invalid",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(failure) => write!(f, "{failure}"),
            Self::Unsatisfiable {
                property,
                discarded,
            } => write!(
                f,
                "property {property} is unsatisfiable: {discarded} trials discarded, none passed"
            ),
            Self::InvalidBlob(msg) => write!(f, "invalid reproduction blob: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationLogEntry {
    pub ts_millis: u128,
    pub property: String,
    pub run_fingerprint: String,
    pub base_seed: u64,
    pub outcome: &'static str,
    pub reason_code: String,
    pub passed: usize,
    pub discarded: usize,
    pub duration_ms: u128,
    pub blob: Option<String>,
}

pub fn set_generation_log_path(path: Option<PathBuf>) {
    let cell = GENERATION_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

/// SHA-256 over the inputs that determine a run.
#[must_use]
pub fn run_fingerprint(property: &str, base_seed: u64, settings: &Settings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(property.as_bytes());
    hasher.update(base_seed.to_be_bytes());
    hasher.update((settings.max_examples as u64).to_be_bytes());
    hasher.update((settings.max_discard_ratio as u64).to_be_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn maybe_append_generation_log(entry: &GenerationLogEntry) -> Result<(), String> {
    let configured = GENERATION_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os(GENERATION_LOG_ENV).map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing generation log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending generation log {}: {err}", path.display()))
}

struct RunState<'a> {
    property: &'a str,
    settings: &'a Settings,
    base_seed: u64,
    started: Instant,
    ledger: RefCell<EvidenceLedger>,
    failure: RefCell<Option<PropertyFailure>>,
    past_deadline: Cell<bool>,
}

impl RunState<'_> {
    fn log(&self, outcome: &'static str, reason_code: &str, blob: Option<String>) {
        let ledger = self.ledger.borrow();
        let entry = GenerationLogEntry {
            ts_millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis()),
            property: self.property.to_string(),
            run_fingerprint: run_fingerprint(self.property, self.base_seed, self.settings),
            base_seed: self.base_seed,
            outcome,
            reason_code: reason_code.to_string(),
            passed: ledger.count(TrialOutcome::Passed),
            discarded: ledger.count(TrialOutcome::Discarded),
            duration_ms: self.started.elapsed().as_millis(),
            blob,
        };
        // A broken log sink must not turn a passing property into a failure.
        if let Err(err) = maybe_append_generation_log(&entry) {
            eprintln!("generation_log_write_failed: {err}");
        }
    }

    /// One runner case. Trials past the deadline pass without running the
    /// body, so the runner drains its remaining cases cheaply.
    fn trial<E, F>(&self, trial_seed: u64, body: &RefCell<F>) -> Result<(), TestCaseError>
    where
        E: TrialFailure,
        F: FnMut(&mut DeterministicRng) -> Result<(), E>,
    {
        if self
            .settings
            .deadline
            .is_some_and(|deadline| self.started.elapsed() >= deadline)
        {
            self.past_deadline.set(true);
            return Ok(());
        }

        let blob = ReproductionBlob { trial_seed };
        let mut rng = blob.rng();
        let result = (&mut *body.borrow_mut())(&mut rng);
        let (outcome, reason_code, note) = match &result {
            Ok(()) => (TrialOutcome::Passed, "trial_passed", String::new()),
            Err(err) if err.is_discard() => {
                (TrialOutcome::Discarded, err.reason_code(), err.to_string())
            }
            Err(err) => (TrialOutcome::Failed, err.reason_code(), err.to_string()),
        };
        let mut ledger = self.ledger.borrow_mut();
        let trial = ledger.events().len() as u64;
        ledger.record(TrialEvent {
            trial,
            outcome,
            reason_code,
            draws: rng.draws(),
            note: note.clone(),
        });
        match outcome {
            TrialOutcome::Passed => Ok(()),
            TrialOutcome::Discarded => Err(TestCaseError::reject(note)),
            TrialOutcome::Failed => {
                *self.failure.borrow_mut() = Some(PropertyFailure {
                    property: self.property.to_string(),
                    trial,
                    blob,
                    reason_code,
                    message: note.clone(),
                    print_blob: self.settings.print_blob,
                });
                Err(TestCaseError::fail(note))
            }
        }
    }

    fn finish(
        self,
        result: Result<(), TestError<u64>>,
        replay: bool,
    ) -> Result<RunReport, RuntimeError> {
        let stop = match result {
            Err(TestError::Fail(reason, trial_seed)) => {
                // A body that panicked never reached the ledger.
                let failure = self.failure.take().unwrap_or_else(|| PropertyFailure {
                    property: self.property.to_string(),
                    trial: self.ledger.borrow().events().len() as u64,
                    blob: ReproductionBlob { trial_seed },
                    reason_code: "trial_panicked",
                    message: reason.message().to_string(),
                    print_blob: self.settings.print_blob,
                });
                self.log("fail", failure.reason_code, Some(failure.blob.encode()));
                return Err(RuntimeError::Failed(Box::new(failure)));
            }
            _ if replay => StopReason::Reproduced,
            Err(TestError::Abort(_)) => StopReason::DiscardBudget,
            Ok(()) if self.past_deadline.get() => StopReason::Deadline,
            Ok(()) => StopReason::MaxExamples,
        };

        let ledger = self.ledger.borrow().clone();
        let passed = ledger.count(TrialOutcome::Passed);
        let discarded = ledger.count(TrialOutcome::Discarded);
        if passed == 0 && discarded > 0 && stop != StopReason::Reproduced {
            self.log("unsatisfiable", "property_unsatisfiable", None);
            return Err(RuntimeError::Unsatisfiable {
                property: self.property.to_string(),
                discarded,
            });
        }
        self.log("pass", "trial_passed", None);
        Ok(RunReport {
            property: self.property.to_string(),
            base_seed: self.base_seed,
            passed,
            discarded,
            stop,
            duration: self.started.elapsed(),
            ledger,
        })
    }
}

/// Runs `body` on a proptest runner until `max_examples` trials pass, the
/// discard budget is spent, or the deadline passes.
///
/// Discards become runner rejections; the first genuine failure stops the
/// run and carries the blob that replays it. With `settings.reproduce` set,
/// only the trial named by the blob runs.
pub fn run_property<E, F>(
    property: &str,
    settings: &Settings,
    body: F,
) -> Result<RunReport, RuntimeError>
where
    E: TrialFailure,
    F: FnMut(&mut DeterministicRng) -> Result<(), E>,
{
    let replay = settings
        .reproduce
        .as_deref()
        .map(ReproductionBlob::decode)
        .transpose()?;
    let state = RunState {
        property,
        settings,
        base_seed: settings.base_seed(property),
        started: Instant::now(),
        ledger: RefCell::new(EvidenceLedger::new()),
        failure: RefCell::new(None),
        past_deadline: Cell::new(false),
    };
    let body = RefCell::new(body);

    let mut config = settings.proptest_config();
    if replay.is_some() {
        config.cases = 1;
        config.max_global_rejects = 1;
    }
    let mut runner = TestRunner::new_with_rng(config, runner_rng(state.base_seed));
    let result = match replay {
        Some(blob) => runner.run(&Just(blob.trial_seed), |seed| state.trial(seed, &body)),
        None => runner.run(&any::<u64>().no_shrink(), |seed| {
            state.trial(seed, &body)
        }),
    };
    state.finish(result, replay.is_some())
}
