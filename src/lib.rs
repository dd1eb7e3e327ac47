//! Client library for MetroPro Remote Control (MRC) servers.
//!
//! This library contains the session, script execution and status callback
//! layers used to drive a MetroPro server remotely. It is used by the `mrc`
//! command-line tool and can run against the vendor client library (feature
//! `native`) or the in-process [`SimulatedServer`].

pub mod client;
pub mod codes;
pub mod config;
pub mod error;
pub mod logging;
#[cfg(feature = "native")]
pub mod native;
pub mod normalizer;
pub mod session;
pub mod simulator;
pub mod status;
pub mod transport;

pub use client::{MrcClient, RunMode, ScriptOutput};
pub use config::{ClientConfig, ConfigError};
pub use error::{ErrorCode, ErrorKind, MrcError, MrcResult};
#[cfg(feature = "native")]
pub use native::NativeInterface;
pub use session::{
    HandleState, RunOutcome, ScriptContext, ScriptRequest, ScriptResult, ServerState, Session,
    StopValue, StopValueKind,
};
pub use simulator::SimulatedServer;
pub use status::{CallbackState, StatusEvent, StatusKind, StatusMask, Subscriber};
pub use transport::RemoteInterface;
