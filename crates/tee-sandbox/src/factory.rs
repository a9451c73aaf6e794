//! Backend selection and the one-shot scoped runner.

use std::sync::Arc;

use tracing::warn;

use crate::error::TeeResult;
use crate::isolate::{ExecOutput, Isolate};
use crate::policy::{IsolationLevel, TeePolicy};
use crate::process::ProcessIsolate;

/// Validate `policy`, then build an isolate for its isolation level.
///
/// Container and VM levels are accepted and run on the process backend until
/// dedicated backends exist; the policy (and its capability flags) is carried
/// unchanged so the child still sees the requested level.
pub fn create_isolate(policy: TeePolicy) -> TeeResult<Arc<dyn Isolate>> {
    policy.validate()?;

    match policy.isolation {
        IsolationLevel::Process => {}
        level @ (IsolationLevel::Container | IsolationLevel::Vm) => {
            warn!(requested = %level, "isolation backend unavailable; degrading to process");
        }
    }
    Ok(Arc::new(ProcessIsolate::new(policy)))
}

/// Start an isolate, run one command, and stop it on every exit path.
pub async fn run_isolated(
    policy: TeePolicy,
    command: &str,
    args: &[String],
) -> TeeResult<ExecOutput> {
    let isolate = create_isolate(policy)?;
    isolate.start().await?;

    let result = isolate.execute(command, args).await;
    let stopped = isolate.stop().await;

    let output = result?;
    stopped?;
    Ok(output)
}
