// Licensed under the MIT License.

//! Controller/agent state machines and event loops (§4.6): the host routes
//! instructions and gathers results, worker controllers mirror its states
//! with per-command `Busy` phases, and each controller's agent owns and
//! evaluates its share of the data.

pub mod agent;
pub mod host;
pub mod message;
pub mod worker;

pub use message::ControllerMessage;

use serde::{Deserialize, Serialize};

/// `Busy` sub-states for a controller (§4.6), one per command class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyPhase {
    Partitioning,
    Loading,
    Indexing,
    Evaluating,
}

/// A controller's lifecycle state. The host and every worker share this
/// shape (§4.6: "Worker states mirror Host"); only the host additionally
/// talks to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Initializing,
    Ready,
    Busy(BusyPhase),
    Terminating,
}

/// Distance-join sub-state machine (§4.6), driven per worker while a
/// `DistanceJoinQuery` is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceJoinPhase {
    LocalEvaluate,
    ReportBorderSizes,
    ExchangeBatches,
    FinishOnInstruction,
    ReportResult,
}
