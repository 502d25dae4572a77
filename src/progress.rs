use std::future::Future;
use std::ops::ControlFlow;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub completed: u64,
    pub total: u64,
    pub percent: u8,
}

impl ProgressEvent {
    /// `percent` is `floor(100 * completed / total)`, capped at 100. A zero
    /// total is already complete.
    pub fn new(completed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((completed.min(total) as u128 * 100) / total as u128) as u8
        };
        Self {
            completed,
            total,
            percent,
        }
    }
}

/// Receives progress events. Returning `Break` asks the producer to stop at
/// the next unit boundary.
#[async_trait]
pub trait ProgressObserver: Send {
    async fn on_progress(&mut self, event: ProgressEvent) -> ControlFlow<()>;
}

#[async_trait]
impl ProgressObserver for mpsc::Sender<ProgressEvent> {
    async fn on_progress(&mut self, event: ProgressEvent) -> ControlFlow<()> {
        match self.send(event).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

/// Adapts a closure into an observer.
pub struct FnObserver<F>(pub F);

#[async_trait]
impl<F> ProgressObserver for FnObserver<F>
where
    F: FnMut(ProgressEvent) -> ControlFlow<()> + Send,
{
    async fn on_progress(&mut self, event: ProgressEvent) -> ControlFlow<()> {
        (self.0)(event)
    }
}

/// Turns completed-unit counts into events for one operation. Events never
/// decrease and the 100% event is sent exactly once.
pub struct ProgressReporter<'a> {
    observer: &'a mut dyn ProgressObserver,
    total: u64,
    completed: u64,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(total: u64, observer: &'a mut dyn ProgressObserver) -> Self {
        Self {
            observer,
            total,
            completed: 0,
            finished: false,
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Records `units` more completed work. Nothing is sent once 100% went out.
    pub async fn advance(&mut self, units: u64) -> ControlFlow<()> {
        self.completed = self.completed.saturating_add(units);
        if self.finished || self.total == 0 {
            return ControlFlow::Continue(());
        }
        let event = ProgressEvent::new(self.completed, self.total);
        if event.percent == 100 {
            self.finished = true;
        }
        self.emit(event).await
    }

    /// Sends the 100% event unless `advance` already did.
    pub async fn finish(&mut self) -> ControlFlow<()> {
        if self.finished {
            return ControlFlow::Continue(());
        }
        self.finished = true;
        self.emit(ProgressEvent {
            completed: self.completed,
            total: self.total,
            percent: 100,
        })
        .await
    }

    async fn emit(&mut self, event: ProgressEvent) -> ControlFlow<()> {
        tracing::debug!(
            completed = event.completed,
            total = event.total,
            percent = event.percent,
            "Progress"
        );
        self.observer.on_progress(event).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub completed: u64,
    pub stopped: bool,
}

/// Runs `work(i)` for each unit `0..total` in order, reporting after each one
/// and yielding to the runtime in between. Stops early when the observer
/// breaks; a failed unit ends the run with its error.
pub async fn run<F, Fut>(
    total: u64,
    mut work: F,
    observer: &mut dyn ProgressObserver,
) -> Result<RunOutcome>
where
    F: FnMut(u64) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    let mut reporter = ProgressReporter::new(total, observer);

    for unit in 0..total {
        work(unit).await?;
        if reporter.advance(1).await.is_break() && unit + 1 < total {
            return Ok(RunOutcome {
                completed: reporter.completed(),
                stopped: true,
            });
        }
        tokio::task::yield_now().await;
    }

    let stopped = reporter.finish().await.is_break();
    Ok(RunOutcome {
        completed: reporter.completed(),
        stopped: stopped && reporter.completed() < total,
    })
}
