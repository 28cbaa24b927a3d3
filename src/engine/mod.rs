//! The test engine: drives endpoints through connect, verify, ping,
//! speed test and disconnect, one at a time.
//!
//! [`TestOrchestrator`] owns a run; [`EndpointRunner`] owns one endpoint.
//! Progress is reported through a [`ProgressSink`].

pub mod model;
pub mod orchestrator;
pub mod run_config;
pub mod runner;
pub mod signal;
pub mod sink;

pub use model::{EndpointResult, FailureCause, FinishReason, RunPhase, RunSnapshot, Status, Transition};
pub use orchestrator::TestOrchestrator;
pub use run_config::RunConfig;
pub use runner::EndpointRunner;
pub use signal::{ControlState, RunControl};
pub use sink::{ChannelSink, FanoutSink, LogSink, ProgressEvent, ProgressSink};
