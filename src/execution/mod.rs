pub mod context;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod report;
pub mod result;

pub use context::{CapabilityCache, ExecutionContext, HandlerScope, LedgerError, ResultLedger};
pub use dispatch::{DispatchOutcome, Dispatcher, HandlerKind};
pub use engine::{EngineConfig, EngineError, ExecutionEngine};
pub use registry::{CapabilityHandler, CapabilityRegistry, FnHandler, HandlerError, SimulatedHandler};
pub use report::{JsonReportWriter, ReportSink, RunMode, RunReport, RunSummary};
pub use result::{ExecutionResult, ExecutionStatus, TransitionError};
