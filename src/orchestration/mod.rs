//! Run orchestration: service boundaries, event routing, task execution
//! and the scheduler that drives a streaming plan to its goal.

pub mod coordinator;
pub mod events;
pub mod executor;
pub mod http;
pub mod scheduler;
pub mod service;
pub mod signal;

pub use coordinator::{Coordinator, Run, RunParams};
pub use events::{EventSink, RunEvent};
pub use executor::TaskExecutor;
pub use http::{HttpExecutionService, HttpPlanningService, HttpResultSink};
pub use scheduler::{RunContext, RunFailure, RunOutcome, Scheduler};
pub use service::{
    ByteStream, CreationProps, ExecuteRequest, ExecutionService, ExecutionState, PacketStream,
    PlanRequest, PlanningService, ResultRecord, ResultSink,
};
pub use signal::{AbortReason, AbortSignal};
