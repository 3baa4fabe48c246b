//! Scripted stages for driving the pipeline from tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use docflow::{StageError, StageInput, StageKind, StageOutput};

/// Output a scripted stage of `kind` returns on success.
pub fn output_for(kind: StageKind, job_id: &str) -> StageOutput {
    match kind {
        StageKind::ExtractText => StageOutput::ExtractedText(format!("text of {}", job_id)),
        StageKind::PerformOcr => StageOutput::OcrText(format!("ocr of {}", job_id)),
        StageKind::ExtractKeywords => StageOutput::Keywords(vec!["scripted".to_string()]),
        StageKind::GenerateSummary => StageOutput::Summary("scripted summary".to_string()),
        StageKind::DetectLanguage => StageOutput::Language("en".to_string()),
        StageKind::IndexForSearch => StageOutput::SearchIndex(job_id.to_string()),
    }
}

/// One stage invocation as seen by a scripted stage.
#[derive(Debug, Clone)]
pub struct Call {
    pub job_id: String,
    pub attempt: u32,
    pub at: Instant,
}

/// Succeeds and records every call.
pub struct RecordingStage {
    kind: StageKind,
    calls: Mutex<Vec<Call>>,
}

impl RecordingStage {
    pub fn new(kind: StageKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn job_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.job_id).collect()
    }
}

impl docflow::Stage for RecordingStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        self.calls.lock().unwrap().push(Call {
            job_id: input.job_id.clone(),
            attempt: input.attempt,
            at: Instant::now(),
        });
        Ok(output_for(self.kind, &input.job_id))
    }
}

/// Fails its first `failures` calls, then succeeds. `u32::MAX` never
/// succeeds.
pub struct FlakyStage {
    kind: StageKind,
    failures: u32,
    seen: AtomicU32,
    calls: Mutex<Vec<Call>>,
}

impl FlakyStage {
    pub fn new(kind: StageKind, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failures,
            seen: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing(kind: StageKind) -> Arc<Self> {
        Self::new(kind, u32::MAX)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl docflow::Stage for FlakyStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        self.calls.lock().unwrap().push(Call {
            job_id: input.job_id.clone(),
            attempt: input.attempt,
            at: Instant::now(),
        });
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(StageError::Failed(format!("scripted failure {}", n + 1)))
        } else {
            Ok(output_for(self.kind, &input.job_id))
        }
    }
}

/// Blocks every call until released, so tests can act while a job is held.
pub struct GateStage {
    kind: StageKind,
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    entered: u32,
    open: bool,
}

impl GateStage {
    pub fn new(kind: StageKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        })
    }

    /// Waits until at least one call is blocked in the gate.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while state.entered == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    pub fn release(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

impl docflow::Stage for GateStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let mut state = self.state.lock().unwrap();
        state.entered += 1;
        self.changed.notify_all();
        while !state.open {
            state = self.changed.wait(state).unwrap();
        }
        Ok(output_for(self.kind, &input.job_id))
    }
}

/// Sleeps before succeeding.
pub struct SlowStage {
    kind: StageKind,
    delay: Duration,
}

impl SlowStage {
    pub fn new(kind: StageKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self { kind, delay })
    }
}

impl docflow::Stage for SlowStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        std::thread::sleep(self.delay);
        Ok(output_for(self.kind, &input.job_id))
    }
}
