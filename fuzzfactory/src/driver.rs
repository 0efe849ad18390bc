/// Fuzz run driver
/// 
/// Sequences one fuzz run: start triggers, loggers, the caller's work,
/// loggers again, stop triggers. A failing step aborts that run only and the
/// stop triggers still clean up after it; the factory stays initialized for
/// the next one.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use targetconn::{TargetConnector, TargetError};

use crate::factory::FuzzFactory;
use crate::logger::DataLogger;
use crate::FactoryError;

/// The work done against the target during one run
#[async_trait]
pub trait RunBody: Send {
    async fn execute(&mut self, run: u64, connector: &mut dyn TargetConnector) -> Result<(), TargetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    OnFuzzStart,
    StartLogging,
    Body,
    FinishLogging,
    OnFuzzStop,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::OnFuzzStart => "OnFuzzStart triggers",
            RunStage::StartLogging => "logger start",
            RunStage::Body => "run body",
            RunStage::FinishLogging => "logger finish",
            RunStage::OnFuzzStop => "OnFuzzStop triggers",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("Fuzz run {run} aborted in {stage}: {source}")]
pub struct RunAborted {
    pub run: u64,
    pub stage: RunStage,
    #[source]
    pub source: FactoryError,
}

pub struct FuzzRunDriver<'f> {
    factory: &'f mut FuzzFactory,
    loggers: Vec<Box<dyn DataLogger>>,
    next_run: u64,
}

impl<'f> FuzzRunDriver<'f> {
    pub fn new(factory: &'f mut FuzzFactory) -> Self {
        Self {
            factory,
            loggers: Vec::new(),
            next_run: 1,
        }
    }

    pub fn add_logger(&mut self, logger: Box<dyn DataLogger>) {
        self.loggers.push(logger);
    }

    /// Number the next run will get
    pub fn next_run(&self) -> u64 {
        self.next_run
    }

    /// Perform one run, returning its number.
    ///
    /// Once the start triggers succeeded the stop triggers run no matter how
    /// the rest of the run went; the first failure is the one reported.
    pub async fn run_once(&mut self, body: &mut dyn RunBody) -> Result<u64, RunAborted> {
        let run = self.next_run;
        self.next_run += 1;

        log::info!("Starting fuzz run {}", run);
        self.factory
            .run_on_start()
            .await
            .map_err(abort(run, RunStage::OnFuzzStart))?;

        let steps = self.run_steps(run, body).await;
        if let Err(aborted) = &steps {
            log::debug!("{}, running stop triggers", aborted);
        }

        let stop = self
            .factory
            .run_on_stop()
            .await
            .map_err(abort(run, RunStage::OnFuzzStop));

        steps.and(stop)?;
        log::info!("Fuzz run {} finished", run);
        Ok(run)
    }

    /// Loggers and body; the first failing step skips the rest
    async fn run_steps(&mut self, run: u64, body: &mut dyn RunBody) -> Result<(), RunAborted> {
        for logger in self.loggers.iter_mut() {
            logger
                .start_run(run)
                .await
                .map_err(|e| abort(run, RunStage::StartLogging)(e.into()))?;
        }

        let connector = self
            .factory
            .connector_mut()
            .ok_or(FactoryError::NotInitialized)
            .map_err(abort(run, RunStage::Body))?;
        body.execute(run, &mut *connector)
            .await
            .map_err(|e| abort(run, RunStage::Body)(e.into()))?;

        for logger in self.loggers.iter_mut() {
            logger
                .finish_run(run, &mut *connector)
                .await
                .map_err(|e| abort(run, RunStage::FinishLogging)(e.into()))?;
        }
        Ok(())
    }
}

fn abort(run: u64, stage: RunStage) -> impl Fn(FactoryError) -> RunAborted {
    move |source| RunAborted { run, stage, source }
}
