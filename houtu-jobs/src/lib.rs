#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
//! Background jobs on the bevy async compute pool whose outcomes are picked
//! up by the owning thread, one typed outcome at a time.

use std::{
    any, future, pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bevy::tasks::{AsyncComputeTaskPool, TaskPool};

#[cfg(not(target_arch = "wasm32"))]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + Send + 'static>>;
#[cfg(target_arch = "wasm32")]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + 'static>>;

pub trait Job: any::Any + Sized + Send + Sync + 'static {
    type Outcome: any::Any + Send + Sync;

    fn name(&self) -> String;

    fn perform(self, context: Context) -> AsyncReturn<Self::Outcome>;
}

/// Shared flag telling a running job its result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Context {
    pub cancellation: CancellationToken,
}

impl Context {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

pub struct JobOutcomePayload {
    pub job_outcome_type_id: any::TypeId,
    pub job_outcome: Box<dyn any::Any + Send + Sync>,
}

/// Spawns jobs and collects their outcomes.
///
/// Outcomes are only observed through [`JobQueue::take_next`], so whatever
/// state they mutate stays confined to the thread that owns the queue.
pub struct JobQueue {
    outcome_tx: async_channel::Sender<JobOutcomePayload>,
    outcome_recv: async_channel::Receiver<JobOutcomePayload>,
    finished: Vec<JobOutcomePayload>,
    in_progress: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        AsyncComputeTaskPool::init(TaskPool::default);
        let (outcome_tx, outcome_recv) = async_channel::unbounded::<JobOutcomePayload>();
        Self {
            outcome_tx,
            outcome_recv,
            finished: vec![],
            in_progress: 0,
        }
    }

    pub fn spawn<J: Job>(&mut self, job: J) -> CancellationToken {
        let cancellation = CancellationToken::default();
        let context = Context {
            cancellation: cancellation.clone(),
        };
        let outcome_tx = self.outcome_tx.clone();
        let job_name = job.name();
        self.in_progress += 1;

        AsyncComputeTaskPool::get()
            .spawn(async move {
                let instant = instant::Instant::now();
                bevy::log::debug!("Starting job '{}'", job_name);
                let outcome = job.perform(context).await;
                bevy::log::debug!("Completed job '{}' in {:?}", job_name, instant.elapsed());
                if let Err(e) = outcome_tx
                    .send(JobOutcomePayload {
                        job_outcome_type_id: any::TypeId::of::<J>(),
                        job_outcome: Box::new(outcome),
                    })
                    .await
                {
                    bevy::log::error!(
                        "Failed to send result from job {} back to main thread: {:?}",
                        job_name,
                        e
                    );
                }
            })
            .detach();

        cancellation
    }

    /// Jobs spawned whose outcome has not been received yet.
    pub fn in_progress(&self) -> usize {
        self.in_progress
    }

    /// Outcomes received but not taken yet.
    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_progress == 0 && self.finished.is_empty()
    }

    /// Moves every outcome already sent back into the finished list without
    /// blocking.
    pub fn poll(&mut self) {
        while let Ok(outcome) = self.outcome_recv.try_recv() {
            self.in_progress = self.in_progress.saturating_sub(1);
            self.finished.push(outcome);
        }
    }

    /// Blocks until at least one more outcome arrives. Returns `false` when
    /// nothing is in progress.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn block_on_next(&mut self) -> bool {
        if self.in_progress == 0 {
            return false;
        }
        match self.outcome_recv.recv_blocking() {
            Ok(outcome) => {
                self.in_progress -= 1;
                self.finished.push(outcome);
                self.poll();
                true
            }
            Err(e) => {
                bevy::log::error!("job outcome channel closed: {:?}", e);
                false
            }
        }
    }

    #[inline]
    pub fn take_next<J: Job>(&mut self) -> Option<J::Outcome> {
        let index = self.finished.iter().position(|outcome_payload| {
            any::TypeId::of::<J>() == outcome_payload.job_outcome_type_id
                && outcome_payload.job_outcome.is::<J::Outcome>()
        })?;
        let outcome_payload = self.finished.remove(index);
        let outcome = outcome_payload.job_outcome.downcast::<J::Outcome>();
        if outcome.is_err() {
            bevy::log::error!("encountered unexpected job result type");
        }
        outcome.map(|n| *n).ok()
    }
}
