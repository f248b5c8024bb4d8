use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PhaseError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{phase} phase: {unit} failed: {source}")]
    Unit {
        phase: &'static str,
        unit: &'static str,
        source: E,
    },
    #[error("{phase} phase: {unit} panicked")]
    Panicked {
        phase: &'static str,
        unit: &'static str,
    },
    #[error("{phase} phase: unit was cancelled: {source}")]
    Join {
        phase: &'static str,
        source: JoinError,
    },
}

type UnitResult<T, E> = (usize, &'static str, Result<Result<T, E>, ()>);

/// A group of independent units that start together and are judged
/// together.
///
/// Every unit runs to completion even if a sibling fails; only then is the
/// first failure, in spawn order, reported.
pub struct Phase<T, E> {
    name: &'static str,
    units: JoinSet<UnitResult<T, E>>,
    spawned: usize,
}

impl<T, E> Phase<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            units: JoinSet::new(),
            spawned: 0,
        }
    }

    pub fn spawn<F>(&mut self, unit: &'static str, work: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        self.units.spawn(async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await.map_err(|_| ());
            (index, unit, outcome)
        });
    }

    /// Waits for every unit; returns their outputs in spawn order.
    pub async fn run(mut self) -> Result<Vec<T>, PhaseError<E>> {
        let started = Instant::now();
        info!(phase = self.name, units = self.spawned, "phase started");
        let mut finished: Vec<UnitResult<T, E>> = Vec::with_capacity(self.spawned);
        while let Some(joined) = self.units.join_next().await {
            let done = joined.map_err(|source| PhaseError::Join {
                phase: self.name,
                source,
            })?;
            match &done.2 {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(phase = self.name, unit = done.1, error = %err, "unit failed"),
                Err(()) => error!(phase = self.name, unit = done.1, "unit panicked"),
            }
            finished.push(done);
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut outputs = Vec::with_capacity(finished.len());
        for (_, unit, outcome) in finished {
            match outcome {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(source)) => {
                    return Err(PhaseError::Unit {
                        phase: self.name,
                        unit,
                        source,
                    });
                }
                Err(()) => {
                    return Err(PhaseError::Panicked {
                        phase: self.name,
                        unit,
                    });
                }
            }
        }
        info!(
            phase = self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(outputs)
    }
}
