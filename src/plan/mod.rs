//! The "levels" plan format and its incremental parser.

pub mod stream;
pub mod wire;

pub use stream::{LineBuffer, PlanPhase, PlanSummary, StreamingPlanParser, DEFAULT_PARSE_TIMEOUT};
pub use wire::{
    parse_fragment, parse_plan, strip_code_fences, transform_wire_format, PlanFragment, WireEntry,
    WireNode, WirePlan,
};
