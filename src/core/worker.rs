//! Modem control loop
//!
//! The single owner of the transport and the transaction buffer. Each
//! iteration sleeps one task period, then either services one pending
//! command or spends the idle tick on registration polling / raw PPP relay.
//! AT transactions and PPP relay therefore never overlap.

use super::at::{self, AtEngine, CONNECT_MARKER, REGISTRATION_QUERY};
use super::bringup::{self, BringUpOutcome};
use super::command::{CommandOpcode, CommandResponse, Transaction};
use super::ppp::{PppAuth, PppBridge, SharedPppStatus, TransportHost};
use super::state::{SessionState, StateRegister};
use super::transport::{wait_duration, ModemTransport};
use crate::config::ModemConfig;
use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};
use std::thread;

/// Out-of-band requests for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Close the PPP session with a reason code
    Close(u8),
}

/// Worker state. Created on the spawning thread, then moved into the worker.
pub(crate) struct Worker<T: ModemTransport> {
    transport: T,
    bridge: Box<dyn PppBridge>,
    engine: AtEngine,
    config: ModemConfig,
    state: StateRegister,
    ppp_status: SharedPppStatus,
    commands: Receiver<Transaction>,
    control: Receiver<Control>,
    reg_check_count: u64,
}

impl<T: ModemTransport> Worker<T> {
    pub(crate) fn new(
        transport: T,
        bridge: Box<dyn PppBridge>,
        config: ModemConfig,
        state: StateRegister,
        ppp_status: SharedPppStatus,
        commands: Receiver<Transaction>,
        control: Receiver<Control>,
    ) -> Self {
        let engine = AtEngine::new(config.buffer_capacity, config.timings.poll_interval());
        Self {
            transport,
            bridge,
            engine,
            config,
            state,
            ppp_status,
            commands,
            control,
            reg_check_count: 0,
        }
    }

    /// Bring the modem up, then loop until every handle is dropped
    pub(crate) fn run(mut self) {
        self.bring_up();
        while self.step() {}
        tracing::info!("modem worker stopped");
    }

    pub(crate) fn bring_up(&mut self) -> BringUpOutcome {
        bringup::run(&mut self.engine, &mut self.transport, &self.config)
    }

    /// One loop iteration. Returns `false` once the command link is gone.
    pub(crate) fn step(&mut self) -> bool {
        thread::sleep(self.config.timings.task_period());

        while let Ok(control) = self.control.try_recv() {
            self.handle_control(control);
        }

        match self.commands.try_recv() {
            Ok(transaction) => {
                self.service(transaction);
                true
            }
            Err(TryRecvError::Empty) => {
                self.idle_tick();
                true
            }
            Err(TryRecvError::Disconnected) => false,
        }
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Close(reason) => {
                tracing::info!(reason, "closing PPP session");
                let mut host = TransportHost::new(&mut self.transport, &self.ppp_status);
                self.bridge.close(reason, &mut host);
            }
        }
    }

    fn service(&mut self, transaction: Transaction) {
        let request = &transaction.request;
        let opcode = request.opcode();
        tracing::debug!(%opcode, command = request.text(), "servicing command");

        match opcode {
            CommandOpcode::At | CommandOpcode::ExitLinkMode => {
                let ok = self
                    .engine
                    .send_and_wait(&mut self.transport, request.text(), request.timeout());
                if ok && opcode == CommandOpcode::ExitLinkMode {
                    self.state.set(SessionState::Attached);
                }
                tracing::debug!(ok, response = %self.engine.response_lossy(), "AT response");
                let response = CommandResponse::new(ok, self.response_bytes());
                transaction.respond(response);
            }
            CommandOpcode::EnterLinkMode => {
                self.engine
                    .send_and_wait(&mut self.transport, request.text(), request.timeout());
                tracing::debug!(response = %self.engine.response_lossy(), "dial response");
                let connected = self.engine.response_contains(CONNECT_MARKER);
                if connected {
                    self.enter_link_mode();
                }
                let response = CommandResponse::new(connected, self.response_bytes());
                transaction.respond(response);
            }
        }
    }

    fn enter_link_mode(&mut self) {
        self.state.set(SessionState::LinkActive);
        self.bridge.set_default();
        self.bridge.set_auth(PppAuth::Pap, "", "");
        let mut host = TransportHost::new(&mut self.transport, &self.ppp_status);
        self.bridge.connect(&mut host);
    }

    fn idle_tick(&mut self) {
        self.reg_check_count += self.config.timings.task_period_ms;

        let state = self.state.get();
        if self.reg_check_count >= self.config.timings.registration_period_ms && state.is_polled() {
            self.reg_check_count = 0;
            self.poll_registration(state);
        } else {
            self.relay();
        }
    }

    fn poll_registration(&mut self, current: SessionState) {
        let ok = self.engine.send_and_wait(
            &mut self.transport,
            REGISTRATION_QUERY,
            self.config.rx_timeout_default,
        );
        let registered = ok && at::is_registered(self.engine.response());
        let next = if registered {
            SessionState::Attached
        } else {
            SessionState::Idle
        };
        if next != current {
            tracing::debug!(response = %self.engine.response_lossy(), "registration changed");
        }
        self.state.set(next);
    }

    fn relay(&mut self) {
        let buffer = self.engine.buffer_mut();
        let capacity = buffer.capacity();
        let timeout = wait_duration(capacity, self.transport.baud_rate());

        let read = self.transport.read(buffer.spare(capacity), timeout);
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "link read failed");
                0
            }
        };
        buffer.set_len(n);
        if n == 0 {
            return;
        }

        tracing::trace!(len = n, data = %hex::encode(buffer.as_bytes()), "PPP rx");
        let mut host = TransportHost::new(&mut self.transport, &self.ppp_status);
        self.bridge.feed(buffer.as_bytes(), &mut host);
    }

    fn response_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.engine.response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemTimings;
    use crate::core::command::{CommandLink, CommandRequest};
    use crate::core::ppp::{PppHost, PppStatus};
    use crate::core::simulator::SimulatedModem;
    use crossbeam_channel::{unbounded, Sender};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const REGISTERED: &str = "\r\n+CEREG: 2,1,\"2F4A\",\"01A2D101\",7\r\n\r\nOK\r\n";
    const SEARCHING: &str = "\r\n+CEREG: 2,2,\"2F4A\",\"01A2D101\",7\r\n\r\nOK\r\n";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Feed(Vec<u8>),
        SetDefault,
        SetAuth(PppAuth),
        Connect,
        Close(u8),
    }

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl PppBridge for Recorder {
        fn feed(&mut self, data: &[u8], _host: &mut dyn PppHost) {
            self.events.lock().push(Event::Feed(data.to_vec()));
        }
        fn set_default(&mut self) {
            self.events.lock().push(Event::SetDefault);
        }
        fn set_auth(&mut self, auth: PppAuth, _user: &str, _password: &str) {
            self.events.lock().push(Event::SetAuth(auth));
        }
        fn connect(&mut self, _host: &mut dyn PppHost) {
            self.events.lock().push(Event::Connect);
        }
        fn close(&mut self, reason: u8, host: &mut dyn PppHost) {
            self.events.lock().push(Event::Close(reason));
            host.status(PppStatus::User);
        }
    }

    struct Fixture {
        worker: Worker<SimulatedModem>,
        link: CommandLink,
        control: Sender<Control>,
        state: StateRegister,
        status: SharedPppStatus,
        events: Arc<Mutex<Vec<Event>>>,
    }

    fn fixture(modem: SimulatedModem) -> Fixture {
        let config = ModemConfig {
            rx_timeout_min: 2,
            rx_timeout_default: 2,
            timings: ModemTimings {
                registration_period_ms: 3,
                ..ModemTimings::immediate()
            },
            ..ModemConfig::default()
        };
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        let state = StateRegister::new();
        let status = SharedPppStatus::default();
        let (link, commands) = CommandLink::channel(2);
        let (control, control_rx) = unbounded();
        let worker = Worker::new(
            modem,
            Box::new(recorder),
            config,
            state.clone(),
            status.clone(),
            commands,
            control_rx,
        );
        Fixture {
            worker,
            link,
            control,
            state,
            status,
            events,
        }
    }

    fn steps(worker: &mut Worker<SimulatedModem>, n: usize) {
        for _ in 0..n {
            assert!(worker.step());
        }
    }

    #[test]
    fn test_poll_attaches_after_threshold() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact(REGISTRATION_QUERY, REGISTERED);
        let handle = modem.handle();
        let mut f = fixture(modem);
        f.state.start();

        steps(&mut f.worker, 2);
        assert_eq!(f.state.get(), SessionState::Idle);
        assert!(handle.commands().is_empty());

        steps(&mut f.worker, 1);
        assert_eq!(f.state.get(), SessionState::Attached);
        assert_eq!(handle.commands(), vec![REGISTRATION_QUERY]);
    }

    #[test]
    fn test_poll_demotes_on_registration_loss() {
        let mut modem = SimulatedModem::new();
        modem
            .respond_once(REGISTRATION_QUERY, REGISTERED)
            .respond_exact(REGISTRATION_QUERY, SEARCHING);
        let mut f = fixture(modem);
        f.state.start();

        steps(&mut f.worker, 3);
        assert_eq!(f.state.get(), SessionState::Attached);
        steps(&mut f.worker, 3);
        assert_eq!(f.state.get(), SessionState::Idle);
    }

    #[test]
    fn test_truncated_report_does_not_attach() {
        let mut modem = SimulatedModem::new();
        // 20 characters from the marker to the end
        modem.respond_exact(REGISTRATION_QUERY, "+CEREG: 2,1,AB\r\nOK\r\n");
        let mut f = fixture(modem);
        f.state.start();

        steps(&mut f.worker, 6);
        assert_eq!(f.state.get(), SessionState::Idle);
    }

    #[test]
    fn test_unanswered_poll_means_idle() {
        let mut f = fixture(SimulatedModem::new());
        f.state.start();
        f.state.set(SessionState::Attached);

        steps(&mut f.worker, 3);
        assert_eq!(f.state.get(), SessionState::Idle);
    }

    #[test]
    fn test_no_poll_before_start() {
        let modem = SimulatedModem::new();
        let handle = modem.handle();
        let mut f = fixture(modem);

        steps(&mut f.worker, 10);
        assert_eq!(f.state.get(), SessionState::Init);
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_relay_feeds_bridge_in_link_mode() {
        let modem = SimulatedModem::new();
        let handle = modem.handle();
        let mut f = fixture(modem);
        f.state.start();
        f.state.set(SessionState::LinkActive);

        handle.inject(&[0x7e, 0xff, 0x03, 0x7e]);
        steps(&mut f.worker, 10);

        assert!(handle.commands().is_empty());
        assert_eq!(
            *f.events.lock(),
            vec![Event::Feed(vec![0x7e, 0xff, 0x03, 0x7e])]
        );
    }

    #[test]
    fn test_close_goes_through_bridge() {
        let mut f = fixture(SimulatedModem::new());
        f.control.send(Control::Close(0)).unwrap();
        steps(&mut f.worker, 1);

        assert_eq!(*f.events.lock(), vec![Event::Close(0)]);
        assert_eq!(*f.status.lock(), Some(PppStatus::User));
    }

    #[test]
    fn test_worker_stops_when_link_dropped() {
        let f = fixture(SimulatedModem::new());
        let mut worker = f.worker;
        drop(f.link);
        assert!(!worker.step());
    }

    #[test]
    fn test_connect_marker_enters_link_mode() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("ATD*99***1#", "\r\nCONNECT\r\n");
        let mut f = fixture(modem);
        f.state.start();

        let link = f.link.clone();
        let caller = std::thread::spawn(move || {
            link.submit(
                CommandRequest::new(CommandOpcode::EnterLinkMode, "ATD*99***1#", 2).unwrap(),
            )
        });

        while !caller.is_finished() {
            f.worker.step();
        }
        let rsp = caller.join().unwrap();
        assert!(rsp.ok);
        assert_eq!(f.state.get(), SessionState::LinkActive);
        assert_eq!(
            *f.events.lock(),
            vec![Event::SetDefault, Event::SetAuth(PppAuth::Pap), Event::Connect]
        );
    }

    #[test]
    fn test_split_connect_reply_is_not_relayed() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered(
            "ATD*99***1#",
            ["\r\nCONN", "ECT\r\n"],
            std::time::Duration::from_millis(2),
        );
        let mut f = fixture(modem);
        f.state.start();

        let link = f.link.clone();
        let caller = std::thread::spawn(move || {
            link.submit(
                CommandRequest::new(CommandOpcode::EnterLinkMode, "ATD*99***1#", 2).unwrap(),
            )
        });

        while !caller.is_finished() {
            f.worker.step();
        }
        assert!(caller.join().unwrap().ok);
        assert_eq!(f.state.get(), SessionState::LinkActive);

        steps(&mut f.worker, 5);
        assert!(!f.events.lock().iter().any(|e| matches!(e, Event::Feed(_))));
    }
}
