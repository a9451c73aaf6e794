//! TEE Sandbox: isolation for agent and tool code
//!
//! Every piece of semi-trusted code agentkiln runs (subagent scripts, tool
//! calls, one-off commands) executes inside an [`Isolate`] governed by a
//! validated [`TeePolicy`].
//!
//! ## Layer 0 - Isolation
//!
//! Focus: one start/stop/execute/copy contract over process, container and VM
//! backends. The process backend is complete; container and VM requests are
//! served by it with a warning.
//!
//! ## Key Components
//!
//! - `TeePolicy`: isolation level, resource ceilings, capability flags
//! - `Isolate`: the backend contract
//! - `ProcessIsolate`: temp working dir, scrubbed env, rlimits, timeouts
//! - `CancelHandle` / `CancelToken`: caller-driven cancellation
//! - `usage::sample`: real RSS and CPU time of a child process

mod cancel;
mod error;
mod factory;
mod isolate;
pub mod policy;
mod process;
pub mod usage;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::{TeeError, TeeResult};
pub use factory::{create_isolate, run_isolated};
pub use isolate::{ExecOutput, ExecRequest, Isolate, SpawnedProcess};
pub use policy::{Capabilities, IsolationLevel, ResourceCeiling, TeePolicy};
pub use process::ProcessIsolate;
pub use usage::ProcessUsage;
