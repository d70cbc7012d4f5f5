//! Config-mode gate
//!
//! Polls the config button every [`POLL_INTERVAL`]. The input is pulled up, so a
//! low level means pressed. The first pressed reading starts the configuration web
//! server and latches [`GateState::ServerActive`]; releasing or pressing again
//! changes nothing. The server stays reachable until the device restarts.

use embedded_hal::digital::{Error as _, InputPin};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Button sampling period
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    ServerActive,
}

/// Start side of the configuration web server
pub trait ConfigServerControl {
    /// Start serving; calling it on a running server is a no-op
    fn start(&mut self) -> anyhow::Result<()>;
}

pub struct ConfigModeGate<P, S> {
    pin: P,
    server: S,
    state: GateState,
}

impl<P: InputPin, S: ConfigServerControl> ConfigModeGate<P, S> {
    pub fn new(pin: P, server: S) -> Self {
        Self {
            pin,
            server,
            state: GateState::Idle,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Sample the button once and apply the Idle -> ServerActive transition
    pub fn poll(&mut self) -> GateState {
        let pressed = match self.pin.is_low() {
            Ok(low) => low,
            Err(e) => {
                warn!("Config button read failed: {:?}", e.kind());
                false
            }
        };

        if pressed && self.state == GateState::Idle {
            info!("Configuration mode enabled, starting web server");
            match self.server.start() {
                Ok(()) => self.state = GateState::ServerActive,
                // Stay idle so the next pressed reading retries.
                Err(e) => error!("Failed to start configuration web server: {:#}", e),
            }
        }

        self.state
    }

    /// Poll forever
    pub fn run(mut self) -> ! {
        info!("Config mode task started");
        loop {
            self.poll();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Run the gate on its own thread. The gate itself is built there by `make`, so
    /// only what `make` captures has to be `Send`; a server created later by
    /// `ConfigServerControl::start` stays on the gate thread.
    pub fn spawn<F>(make: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> Self + Send + 'static,
        P: 'static,
        S: 'static,
    {
        thread::Builder::new()
            .name("config-mode".into())
            .stack_size(6144)
            .spawn(move || {
                make().run();
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use std::collections::VecDeque;

    /// Replays levels (true = low/pressed); holds the last one afterwards
    struct ScriptedPin {
        levels: VecDeque<bool>,
        last: bool,
    }

    impl ScriptedPin {
        fn new(levels: &[bool]) -> Self {
            Self {
                levels: levels.iter().copied().collect(),
                last: false,
            }
        }

        fn next_low(&mut self) -> bool {
            if let Some(level) = self.levels.pop_front() {
                self.last = level;
            }
            self.last
        }
    }

    impl ErrorType for ScriptedPin {
        type Error = core::convert::Infallible;
    }

    impl InputPin for ScriptedPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.next_low())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.next_low())
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = ErrorKind;
    }

    impl InputPin for BrokenPin {
        fn is_high(&mut self) -> Result<bool, ErrorKind> {
            Err(ErrorKind::Other)
        }

        fn is_low(&mut self) -> Result<bool, ErrorKind> {
            Err(ErrorKind::Other)
        }
    }

    #[derive(Default)]
    struct CountingServer {
        starts: usize,
        failures_left: usize,
    }

    impl ConfigServerControl for CountingServer {
        fn start(&mut self) -> anyhow::Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                anyhow::bail!("httpd start failed");
            }
            self.starts += 1;
            Ok(())
        }
    }

    #[test]
    fn test_idle_while_released() {
        let mut gate = ConfigModeGate::new(ScriptedPin::new(&[false, false, false]), CountingServer::default());
        for _ in 0..3 {
            assert_eq!(gate.poll(), GateState::Idle);
        }
        assert_eq!(gate.server.starts, 0);
    }

    #[test]
    fn test_latches_once_on_repeated_press() {
        let mut gate = ConfigModeGate::new(ScriptedPin::new(&[false, true, true, true]), CountingServer::default());

        assert_eq!(gate.poll(), GateState::Idle);
        for _ in 0..3 {
            assert_eq!(gate.poll(), GateState::ServerActive);
        }
        assert_eq!(gate.server.starts, 1);
    }

    #[test]
    fn test_release_does_not_return_to_idle() {
        let mut gate = ConfigModeGate::new(
            ScriptedPin::new(&[true, false, false, true, false]),
            CountingServer::default(),
        );

        for _ in 0..5 {
            assert_eq!(gate.poll(), GateState::ServerActive);
        }
        assert_eq!(gate.state(), GateState::ServerActive);
        assert_eq!(gate.server.starts, 1);
    }

    #[test]
    fn test_start_failure_retries_on_next_press() {
        let server = CountingServer { failures_left: 1, ..Default::default() };
        let mut gate = ConfigModeGate::new(ScriptedPin::new(&[true, true]), server);

        assert_eq!(gate.poll(), GateState::Idle);
        assert_eq!(gate.poll(), GateState::ServerActive);
        assert_eq!(gate.server.starts, 1);
    }

    struct SharedServer(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl ConfigServerControl for SharedServer {
        fn start(&mut self) -> anyhow::Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_spawned_gate_starts_server() {
        let starts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = starts.clone();
        ConfigModeGate::spawn(move || ConfigModeGate::new(ScriptedPin::new(&[true]), SharedServer(counter))).unwrap();

        thread::sleep(POLL_INTERVAL * 3);
        assert_eq!(starts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_error_counts_as_released() {
        let mut gate = ConfigModeGate::new(BrokenPin, CountingServer::default());
        assert_eq!(gate.poll(), GateState::Idle);
        assert_eq!(gate.server.starts, 0);
    }
}
