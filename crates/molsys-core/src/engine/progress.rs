/// Events emitted while a workflow drives a system.
#[derive(Debug, Clone)]
pub enum Progress {
    /// Scenario set-up (molecules, groups, forcefields) begins.
    SetupStart,
    SetupFinish,

    ReplayStart { total_steps: u64 },
    StepStart { label: String },
    /// `ok` is false when the step failed and was rolled back.
    StepDone { label: String, ok: bool },
    ReplayFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}
