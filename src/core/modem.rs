//! Modem handle
//!
//! Ties the pieces together: spawns the worker thread with its transport
//! and PPP bridge, and exposes the command link, state register and close
//! request to the rest of the program.

use super::command::{CommandError, CommandLink, CommandOpcode, CommandRequest, CommandResponse};
use super::ppp::{PppBridge, PppStatus, SharedPppStatus};
use super::state::{SessionState, StateRegister, StateTransition};
use super::transport::{ModemTransport, TransportError};
use super::worker::{Control, Worker};
use crate::config::ModemConfig;
use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Normal close reason for [`Modem::stop`]
pub const CLOSE_NORMAL: u8 = 0;

/// Modem errors
#[derive(Error, Debug)]
pub enum ModemError {
    /// The worker thread could not be started
    #[error("Failed to spawn modem worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The transport could not be opened
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Handle to a running modem worker.
///
/// Cloning is cheap; the worker exits once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct Modem {
    link: CommandLink,
    state: StateRegister,
    control: Sender<Control>,
    ppp_status: SharedPppStatus,
    worker: Arc<thread::JoinHandle<()>>,
}

impl Modem {
    /// Spawn the worker. Bring-up runs on the worker before it takes
    /// commands; requests submitted meanwhile wait in the queue.
    pub fn spawn<T>(
        transport: T,
        bridge: Box<dyn PppBridge>,
        config: ModemConfig,
    ) -> Result<Self, ModemError>
    where
        T: ModemTransport + 'static,
    {
        let state = StateRegister::new();
        let ppp_status = SharedPppStatus::default();
        let (link, commands) = CommandLink::channel(config.queue_depth);
        let (control, control_rx) = unbounded();

        let worker = Worker::new(
            transport,
            bridge,
            config,
            state.clone(),
            ppp_status.clone(),
            commands,
            control_rx,
        );

        let handle = thread::Builder::new()
            .name("modem".to_string())
            .spawn(move || worker.run())
            .map_err(ModemError::Spawn)?;

        Ok(Self {
            link,
            state,
            control,
            ppp_status,
            worker: Arc::new(handle),
        })
    }

    /// Release the state machine from `Init` to `Idle`
    pub fn start(&self) {
        if !self.state.start() {
            tracing::debug!(state = %self.state.get(), "start ignored");
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Most recent state transition
    pub fn last_transition(&self) -> Option<StateTransition> {
        self.state.last_transition()
    }

    /// Shared state register, for readers
    pub fn state_register(&self) -> &StateRegister {
        &self.state
    }

    /// Command link, for callers that only submit
    pub fn link(&self) -> &CommandLink {
        &self.link
    }

    /// Last PPP status reported by the bridge
    pub fn ppp_status(&self) -> Option<PppStatus> {
        *self.ppp_status.lock()
    }

    /// Submit a request and wait for its response
    pub fn submit(&self, request: CommandRequest) -> CommandResponse {
        self.link.submit(request)
    }

    /// Run a plain AT command
    pub fn send_at(&self, command: &str, timeout: u32) -> Result<CommandResponse, CommandError> {
        Ok(self.submit(CommandRequest::at(command, timeout)?))
    }

    /// Dial into data mode
    pub fn enter_link_mode(
        &self,
        dial: &str,
        timeout: u32,
    ) -> Result<CommandResponse, CommandError> {
        let request = CommandRequest::new(CommandOpcode::EnterLinkMode, dial, timeout)?;
        Ok(self.submit(request))
    }

    /// Escape back to command mode
    pub fn exit_link_mode(
        &self,
        command: &str,
        timeout: u32,
    ) -> Result<CommandResponse, CommandError> {
        let request = CommandRequest::new(CommandOpcode::ExitLinkMode, command, timeout)?;
        Ok(self.submit(request))
    }

    /// Ask the bridge to close the PPP session (reason 0)
    pub fn stop(&self) {
        if self.control.send(Control::Close(CLOSE_NORMAL)).is_err() {
            tracing::warn!("modem worker not running, close dropped");
        }
    }

    /// Whether the worker thread has exited, e.g. after a bridge panic
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}
