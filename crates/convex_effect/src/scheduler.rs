use std::{
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use serde::Serialize;

use crate::{
    functions::{
        FunctionKind,
        FunctionReference,
    },
    host::SchedulerHost,
    types::ScheduledFunctionId,
    value::{
        Value,
        to_value,
    },
};

/// Schedules mutations and actions to run later. Scheduling from a mutation
/// is transactional: if the mutation fails, nothing is scheduled.
#[derive(Clone)]
pub struct Scheduler {
    host: Arc<dyn SchedulerHost>,
}

impl Scheduler {
    pub fn new(host: Arc<dyn SchedulerHost>) -> Self {
        Self { host }
    }

    /// Run `function` once `delay` has passed. A zero delay runs it as soon
    /// as the current function finishes.
    pub async fn run_after<A: Serialize + ?Sized>(
        &self,
        delay: Duration,
        function: &FunctionReference,
        args: &A,
    ) -> anyhow::Result<ScheduledFunctionId> {
        let args = scheduled_args(function, args)?;
        self.host.run_after(delay, function, args).await
    }

    /// Run `function` at `timestamp`. Timestamps in the past run
    /// immediately.
    pub async fn run_at<A: Serialize + ?Sized>(
        &self,
        timestamp: SystemTime,
        function: &FunctionReference,
        args: &A,
    ) -> anyhow::Result<ScheduledFunctionId> {
        let args = scheduled_args(function, args)?;
        self.host.run_at(timestamp, function, args).await
    }

    /// Cancel a scheduled function that hasn't started. Canceling one that
    /// already ran is a no-op.
    pub async fn cancel(&self, id: &ScheduledFunctionId) -> anyhow::Result<()> {
        self.host.cancel(id).await
    }
}

fn scheduled_args<A: Serialize + ?Sized>(
    function: &FunctionReference,
    args: &A,
) -> anyhow::Result<Value> {
    anyhow::ensure!(
        matches!(function.kind, FunctionKind::Mutation | FunctionKind::Action),
        "Only mutations and actions can be scheduled, `{}` is a {}",
        function.path,
        function.kind
    );
    let args = to_value(args)?;
    anyhow::ensure!(
        matches!(args, Value::Object(_)),
        "Arguments to scheduled function `{}` must be an object",
        function.path
    );
    Ok(args)
}
