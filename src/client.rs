//! High-level client
//!
//! [`MrcClient`] bundles the steps every program performs against a MetroPro
//! server: create and configure a handle, optionally ping, pick the script
//! context and wire up status notifications. After that, running a script is
//! a single call.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mrc_client::{ClientConfig, MrcClient, RunMode, ScriptRequest, SimulatedServer};
//!
//! # fn main() -> mrc_client::MrcResult<()> {
//! let client = MrcClient::connect(&ClientConfig::default(), Arc::new(SimulatedServer::new()))?;
//! let output = client.run_script(ScriptRequest::InlineText("print 1+1".into()), RunMode::Blocking)?;
//! assert_eq!(output.text, "2\n");
//! client.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ErrorCode, MrcResult};
use crate::session::{
    RunOutcome, ScriptRequest, ScriptResult, ServerState, Session, StopValue, StopValueKind,
};
use crate::status::{StatusEvent, StatusKind, Subscriber};
use crate::transport::RemoteInterface;

/// How [`MrcClient::run_script`] waits for the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Block inside the library until the script is done.
    Blocking,
    /// Start the script and poll at the given interval until it is done.
    Polling(Duration),
    /// Start the script and return at once.
    Detached,
}

/// What a script run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptOutput {
    /// Text output; empty for a detached run.
    pub text: String,
    /// False when the script was only started.
    pub completed: bool,
}

impl From<ScriptResult> for ScriptOutput {
    fn from(result: ScriptResult) -> Self {
        Self {
            text: result.output,
            completed: true,
        }
    }
}

/// A connected MRC client.
pub struct MrcClient {
    session: Session,
    poll_interval: Duration,
}

impl MrcClient {
    /// Create, configure and prepare a session according to `config`.
    ///
    /// If any step fails the handle is released again before returning.
    pub fn connect(config: &ClientConfig, transport: Arc<dyn RemoteInterface>) -> MrcResult<Self> {
        config.validate()?;

        let session =
            Session::new(transport).with_output_capacity(config.script.output_buffer_size);
        session.create()?;

        if let Err(err) = Self::prepare(&session, config) {
            if let Err(cleanup) = session.destroy() {
                warn!(error = %cleanup, "Failed to free interface after connect error");
            }
            return Err(err);
        }

        info!(
            handle = session.raw_handle(),
            protocol = %config.connection.protocol,
            end_point = %config.connection.end_point,
            "Connected to MRC server"
        );
        Ok(Self {
            session,
            poll_interval: config.poll_interval(),
        })
    }

    fn prepare(session: &Session, config: &ClientConfig) -> MrcResult<()> {
        let connection = &config.connection;
        session.configure(
            &connection.protocol,
            &connection.network_address,
            &connection.end_point,
        )?;
        if connection.ping_on_connect {
            session.ping()?;
        }
        session.set_script_context(config.script.context)?;

        for kind in StatusKind::ALL {
            session.add_subscriber(kind, trace_subscriber());
        }

        if config.callbacks.enabled {
            session.set_callback_mask(config.status_mask()?)?;
            let id = config
                .callbacks
                .correlation_id
                .unwrap_or_else(|| session.raw_handle());
            session.register_entry_point(id)?;
        }
        Ok(())
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Poll interval from the configuration.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Round trip to the server.
    pub fn ping(&self) -> MrcResult<()> {
        self.session.ping()
    }

    /// Make `request` the script to run, clearing the other source.
    fn set_source(&self, request: ScriptRequest) -> MrcResult<()> {
        let cleared = match &request {
            ScriptRequest::FileReference(_) => ScriptRequest::InlineText(String::new()),
            ScriptRequest::InlineText(_) => ScriptRequest::FileReference(String::new()),
        };
        self.session.set_script_source(&cleared)?;
        self.session.set_script_source(&request)
    }

    /// Run a script file or script text.
    pub fn run_script(&self, request: ScriptRequest, mode: RunMode) -> MrcResult<ScriptOutput> {
        self.set_source(request)?;
        let outcome = match mode {
            RunMode::Blocking => self.session.run(true)?,
            RunMode::Polling(interval) => {
                RunOutcome::Completed(self.session.run_polling(interval)?)
            }
            RunMode::Detached => self.session.run(false)?,
        };
        Ok(match outcome {
            RunOutcome::Completed(result) => result.into(),
            RunOutcome::Started => ScriptOutput {
                text: String::new(),
                completed: false,
            },
        })
    }

    /// Run a script, yielding to the async runtime between polls.
    ///
    /// Dropping the returned future stops polling. The script itself keeps
    /// running on the server.
    pub async fn run_script_polled(
        &self,
        request: ScriptRequest,
        interval: Duration,
    ) -> MrcResult<ScriptOutput> {
        self.set_source(request)?;
        let result = self.session.run_polled(interval).await?;
        Ok(result.into())
    }

    /// Stop value of the last run.
    pub fn script_stop_value(&self, kind: StopValueKind) -> MrcResult<StopValue> {
        self.session.stop_value(kind)
    }

    /// Exit code of the last run.
    pub fn script_error(&self) -> MrcResult<ErrorCode> {
        self.session.script_error()
    }

    /// Whether a script is running.
    pub fn is_running(&self) -> MrcResult<bool> {
        self.session.is_running()
    }

    /// GUID of the RPC interface.
    pub fn interface_guid(&self) -> String {
        self.session.interface_guid()
    }

    /// Server control state.
    pub fn server_state(&self) -> MrcResult<ServerState> {
        self.session.server_state()
    }

    /// Put the server into the active state.
    pub fn request_control(&self) -> MrcResult<()> {
        self.session.request_control()
    }

    /// Return the server to the idle state.
    pub fn release_control(&self) -> MrcResult<()> {
        self.session.release_control()
    }

    /// Block until idle, for at most `timeout`.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> MrcResult<()> {
        self.session.wait_idle(timeout)
    }

    /// Subscribe to `kind`. Returns false if already subscribed.
    pub fn add_subscriber(&self, kind: StatusKind, subscriber: Subscriber) -> bool {
        self.session.add_subscriber(kind, subscriber)
    }

    /// Unsubscribe from `kind`.
    pub fn remove_subscriber(&self, kind: StatusKind, subscriber: &Subscriber) -> bool {
        self.session.remove_subscriber(kind, subscriber)
    }

    /// Remove every subscriber for `kind`, including the built-in tracer.
    pub fn clear_subscribers(&self, kind: StatusKind) {
        self.session.clear_subscribers(kind);
    }

    /// Channel receiving every status notification for this client.
    pub fn events(&self) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let forward = Subscriber::forward_to(tx);
        for kind in StatusKind::ALL {
            self.session.add_subscriber(kind, forward.clone());
        }
        rx
    }

    /// Write `text` to a fresh diagnostic log file.
    pub fn log(&self, text: &str, file: impl AsRef<Path>) -> MrcResult<()> {
        self.session.open_log_file(file)?;
        self.session.log_message(text);
        self.session.close_log_file();
        Ok(())
    }

    /// Release control and free the handle.
    ///
    /// While a detached script is still running, control is left with the
    /// server and only the handle is freed. The handle is freed even if
    /// releasing control fails; the first error is returned.
    pub fn close(self) -> MrcResult<()> {
        let released = match self.session.is_idle() {
            Ok(true) => self.session.release_control(),
            Ok(false) => {
                debug!("Script still running; leaving server control as is");
                Ok(())
            }
            Err(err) => Err(err),
        };
        let destroyed = self.session.destroy();
        debug!("Client closed");
        released.and(destroyed)
    }
}

fn trace_subscriber() -> Subscriber {
    Subscriber::from_fn(|event: &StatusEvent| {
        debug!(
            kind = %event.kind,
            correlation_id = event.correlation_id,
            "Status notification"
        );
    })
}
