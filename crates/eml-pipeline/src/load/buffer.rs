//! Buffered delivery with per-unit fallback
//!
//! Units are delivered in batches of exactly `buffer_size` while the buffer
//! holds at least that many; `clean_up` flushes the remainder. A failed
//! batch never aborts the run:
//!
//! | batch outcome              | action                                     |
//! |----------------------------|--------------------------------------------|
//! | rejected                   | deliver each unit individually             |
//! | transport, retry succeeds  | done                                       |
//! | transport, retry rejected  | deliver each unit individually             |
//! | transport twice            | every unit of the batch is recorded lost   |
//!
//! Individually, a rejected unit is lost and a transport failure is retried
//! once before the unit is lost.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Destination, Loader};
use crate::chunk::Chunk;
use crate::error::{DeliveryError, LoadError};

/// Why a unit never reached the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum LossReason {
    Rejected(String),
    Transport(String),
    /// Still buffered when the run was cancelled
    Cancelled,
    /// Still buffered when another stage failed the run
    RunFailed(String),
}

impl From<DeliveryError> for LossReason {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Rejected(m) => LossReason::Rejected(m),
            DeliveryError::Transport(m) => LossReason::Transport(m),
        }
    }
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::Rejected(m) => write!(f, "rejected: {m}"),
            LossReason::Transport(m) => write!(f, "transport failure: {m}"),
            LossReason::Cancelled => write!(f, "run cancelled"),
            LossReason::RunFailed(m) => write!(f, "run failed: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostUnit {
    pub unit: String,
    pub reason: LossReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Flushes attempted, successful or not
    pub batches_attempted: usize,
    /// Flushes accepted as a whole
    pub batches_delivered: usize,
    pub units_delivered: usize,
    pub lost: Vec<LostUnit>,
}

impl LoadReport {
    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }

    fn lose(&mut self, unit: String, reason: impl Into<LossReason>) {
        self.lost.push(LostUnit {
            unit,
            reason: reason.into(),
        });
    }
}

/// [`Loader`] over any [`Destination`]
pub struct BufferedLoader<D> {
    destination: D,
    buffer: VecDeque<String>,
    buffer_size: usize,
    report: LoadReport,
}

impl<D: Destination> BufferedLoader<D> {
    /// A `buffer_size` of zero is treated as one
    pub fn new(destination: D, buffer_size: usize) -> Self {
        Self {
            destination,
            buffer: VecDeque::new(),
            buffer_size: buffer_size.max(1),
            report: LoadReport::default(),
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Deliver the oldest `buffer_size` units (or fewer, if that is all there is)
    async fn flush(&mut self) {
        let n = self.buffer_size.min(self.buffer.len());
        if n == 0 {
            return;
        }
        let batch: Vec<String> = self.buffer.drain(..n).collect();
        self.report.batches_attempted += 1;

        let started = Instant::now();
        let outcome = self.deliver_batch(batch).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            BatchOutcome::Delivered(units) => {
                info!(destination = self.destination.name(), units, elapsed_ms, "Batch delivered");
            }
            BatchOutcome::Degraded { delivered, lost } => {
                warn!(
                    destination = self.destination.name(),
                    delivered, lost, elapsed_ms, "Batch delivered unit by unit"
                );
            }
            BatchOutcome::Abandoned(units) => {
                error!(
                    destination = self.destination.name(),
                    units, elapsed_ms, "Batch abandoned after repeated transport failure"
                );
            }
        }
    }

    async fn deliver_batch(&mut self, batch: Vec<String>) -> BatchOutcome {
        let name = self.destination.name().to_string();

        let first = match self.destination.deliver(&batch).await {
            Ok(()) => return self.batch_delivered(batch.len()),
            Err(e) => e,
        };

        let rejection = match first {
            DeliveryError::Rejected(reason) => reason,
            DeliveryError::Transport(reason) => {
                warn!(destination = %name, %reason, "Batch transport failure, retrying once");
                match self.destination.deliver(&batch).await {
                    Ok(()) => return self.batch_delivered(batch.len()),
                    Err(DeliveryError::Rejected(reason)) => reason,
                    Err(DeliveryError::Transport(reason)) => {
                        let units = batch.len();
                        for unit in batch {
                            self.report.lose(unit, LossReason::Transport(reason.clone()));
                        }
                        return BatchOutcome::Abandoned(units);
                    }
                }
            }
        };

        warn!(
            destination = %name,
            reason = %rejection,
            units = batch.len(),
            "Batch rejected, delivering units individually"
        );
        self.deliver_each(batch).await
    }

    fn batch_delivered(&mut self, units: usize) -> BatchOutcome {
        self.report.batches_delivered += 1;
        self.report.units_delivered += units;
        BatchOutcome::Delivered(units)
    }

    async fn deliver_each(&mut self, batch: Vec<String>) -> BatchOutcome {
        let mut delivered = 0;
        let mut lost = 0;

        for unit in batch {
            let single = std::slice::from_ref(&unit);
            let result = match self.destination.deliver(single).await {
                Err(DeliveryError::Transport(reason)) => {
                    debug!(
                        destination = self.destination.name(),
                        %reason,
                        "Unit transport failure, retrying once"
                    );
                    self.destination.deliver(single).await
                }
                other => other,
            };

            match result {
                Ok(()) => {
                    delivered += 1;
                    self.report.units_delivered += 1;
                    debug!(destination = self.destination.name(), "Unit delivered");
                }
                Err(e) => {
                    lost += 1;
                    warn!(
                        destination = self.destination.name(),
                        error = %e,
                        unit = %unit,
                        "Unit lost"
                    );
                    self.report.lose(unit, e);
                }
            }
        }

        BatchOutcome::Degraded { delivered, lost }
    }
}

enum BatchOutcome {
    Delivered(usize),
    Degraded { delivered: usize, lost: usize },
    Abandoned(usize),
}

#[async_trait]
impl<D: Destination> Loader for BufferedLoader<D> {
    async fn init(&mut self) -> Result<(), LoadError> {
        self.destination.prepare().await
    }

    async fn execute(&mut self, chunk: Chunk) -> Result<bool, LoadError> {
        if chunk.is_empty() {
            return Ok(false);
        }

        let units = self.destination.encode(chunk)?;
        self.buffer.extend(units);

        while self.buffer.len() >= self.buffer_size {
            self.flush().await;
        }
        Ok(true)
    }

    async fn clean_up(&mut self) -> Result<LoadReport, LoadError> {
        while !self.buffer.is_empty() {
            self.flush().await;
        }

        self.destination.finalize().await?;
        info!(
            destination = self.destination.name(),
            batches = self.report.batches_attempted,
            units = self.report.units_delivered,
            lost = self.report.lost.len(),
            "Loader finished"
        );
        Ok(std::mem::take(&mut self.report))
    }

    async fn abort(&mut self, reason: LossReason) -> LoadReport {
        let discarded = self.buffer.len();
        for unit in self.buffer.drain(..) {
            self.report.lose(unit, reason.clone());
        }
        warn!(
            destination = self.destination.name(),
            discarded,
            "Loader aborted without finalizing"
        );
        std::mem::take(&mut self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Records every delivery attempt and answers from a script; once the
    /// script runs out every delivery succeeds.
    #[derive(Clone, Default)]
    struct Scripted {
        responses: Arc<Mutex<VecDeque<Result<(), DeliveryError>>>>,
        attempts: Arc<Mutex<Vec<Vec<String>>>>,
        finalized: Arc<Mutex<bool>>,
    }

    impl Scripted {
        fn answering(responses: Vec<Result<(), DeliveryError>>) -> Self {
            let s = Self::default();
            *s.responses.lock().unwrap() = responses.into();
            s
        }

        fn attempts(&self) -> Vec<Vec<String>> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Destination for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn prepare(&mut self) -> Result<(), LoadError> {
            Ok(())
        }

        fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError> {
            Ok(vec![chunk.as_value().unwrap().to_string()])
        }

        async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(units.to_vec());
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn finalize(&mut self) -> Result<(), LoadError> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }
    }

    fn rejected() -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected("bad".into()))
    }

    fn transport() -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("timeout".into()))
    }

    async fn feed(loader: &mut BufferedLoader<Scripted>, n: usize) {
        for i in 0..n {
            assert!(loader.execute(Chunk::from(json!(i))).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_full_batches_flush_and_remainder_waits() {
        let dest = Scripted::default();
        let mut loader = BufferedLoader::new(dest.clone(), 3);

        feed(&mut loader, 7).await;

        let attempts = dest.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], vec!["0", "1", "2"]);
        assert_eq!(attempts[1], vec!["3", "4", "5"]);
        assert_eq!(loader.buffered(), 1);

        let report = loader.clean_up().await.unwrap();
        assert_eq!(dest.attempts()[2], vec!["6"]);
        assert_eq!(report.batches_delivered, 3);
        assert_eq!(report.units_delivered, 7);
        assert!(*dest.finalized.lock().unwrap());
    }

    #[tokio::test]
    async fn test_empty_chunks_are_not_buffered() {
        let dest = Scripted::default();
        let mut loader = BufferedLoader::new(dest.clone(), 1);

        assert!(!loader.execute(Chunk::from(json!(null))).await.unwrap());
        assert!(!loader.execute(Chunk::from(json!({}))).await.unwrap());
        assert!(dest.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_batch_falls_back_to_single_units() {
        // batch rejected, then unit 1 ok, unit 2 rejected, unit 3 ok
        let dest = Scripted::answering(vec![rejected(), Ok(()), rejected(), Ok(())]);
        let mut loader = BufferedLoader::new(dest.clone(), 3);

        feed(&mut loader, 3).await;

        let attempts = dest.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(&attempts[1..], &[vec!["0"], vec!["1"], vec!["2"]]);

        let report = loader.report();
        assert_eq!(report.batches_attempted, 1);
        assert_eq!(report.batches_delivered, 0);
        assert_eq!(report.units_delivered, 2);
        assert_eq!(
            report.lost,
            vec![LostUnit {
                unit: "1".into(),
                reason: LossReason::Rejected("bad".into())
            }]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_retries_batch_once() {
        let dest = Scripted::answering(vec![transport()]);
        let mut loader = BufferedLoader::new(dest.clone(), 2);

        feed(&mut loader, 2).await;

        assert_eq!(dest.attempts(), vec![vec!["0", "1"], vec!["0", "1"]]);
        assert_eq!(loader.report().batches_delivered, 1);
        assert!(loader.report().lost.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_transport_failure_abandons_batch() {
        let dest = Scripted::answering(vec![transport(), transport()]);
        let mut loader = BufferedLoader::new(dest.clone(), 2);

        feed(&mut loader, 3).await;
        let report = loader.clean_up().await.unwrap();

        // Abandoned batch, then the remainder in its own flush
        assert_eq!(dest.attempts().len(), 3);
        assert_eq!(report.units_delivered, 1);
        assert_eq!(report.lost.len(), 2);
        assert!(report
            .lost
            .iter()
            .all(|l| matches!(l.reason, LossReason::Transport(_))));
    }

    #[tokio::test]
    async fn test_transport_then_rejection_degrades_to_units() {
        let dest = Scripted::answering(vec![transport(), rejected()]);
        let mut loader = BufferedLoader::new(dest.clone(), 2);

        feed(&mut loader, 2).await;

        assert_eq!(dest.attempts().len(), 4);
        assert_eq!(loader.report().units_delivered, 2);
    }

    #[tokio::test]
    async fn test_single_unit_transport_failure_is_retried_then_lost() {
        // batch rejected; unit 0: transport, transport -> lost; unit 1: transport, ok
        let dest =
            Scripted::answering(vec![rejected(), transport(), transport(), transport(), Ok(())]);
        let mut loader = BufferedLoader::new(dest.clone(), 2);

        feed(&mut loader, 2).await;

        assert_eq!(dest.attempts().len(), 5);
        let report = loader.report();
        assert_eq!(report.units_delivered, 1);
        assert_eq!(report.lost.len(), 1);
        assert_eq!(report.lost[0].unit, "0");
        assert_eq!(report.lost[0].reason, LossReason::Transport("timeout".into()));
    }

    #[tokio::test]
    async fn test_abort_discards_buffer_without_finalizing() {
        let dest = Scripted::default();
        let mut loader = BufferedLoader::new(dest.clone(), 10);

        feed(&mut loader, 3).await;
        let report = loader.abort(LossReason::Cancelled).await;

        assert!(dest.attempts().is_empty());
        assert!(!*dest.finalized.lock().unwrap());
        assert_eq!(report.lost.len(), 3);
        assert!(report.lost.iter().all(|l| l.reason == LossReason::Cancelled));
    }
}
