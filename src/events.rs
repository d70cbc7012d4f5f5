//! Ethernet and IP event handling
//!
//! System event callbacks only post a [`NetworkEvent`] into a bounded channel; a
//! dedicated thread drains it, logs, and keeps a [`LinkTelemetry`] snapshot. Nothing
//! here touches settings or interface configuration.

use log::{info, warn};
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Pending events before new ones are dropped
const EVENT_QUEUE_DEPTH: usize = 16;

/// Opaque reference to the Ethernet driver that raised an event
pub type PortToken = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthEventKind {
    Started,
    Stopped,
    LinkUp,
    LinkDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Eth { kind: EthEventKind, port: PortToken },
    GotIp { ip: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr },
}

/// Reads a port's hardware MAC address
pub trait MacReader: Send {
    fn read_mac(&self, port: PortToken) -> anyhow::Result<[u8; 6]>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpObservation {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// What the event stream has shown so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTelemetry {
    pub started: bool,
    pub link_up: bool,
    pub mac: Option<[u8; 6]>,
    pub ip: Option<IpObservation>,
    pub link_up_count: u32,
    pub link_down_count: u32,
}

/// Shared read access to the telemetry snapshot
#[derive(Clone, Default)]
pub struct TelemetryHandle(Arc<Mutex<LinkTelemetry>>);

impl TelemetryHandle {
    pub fn snapshot(&self) -> LinkTelemetry {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut LinkTelemetry)) {
        let mut telemetry = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *telemetry);
    }
}

/// Non-blocking sender handed to system event callbacks
#[derive(Clone)]
pub struct EventSender(SyncSender<NetworkEvent>);

impl EventSender {
    /// Queue an event; drops it if the dispatcher is behind
    pub fn post(&self, event: NetworkEvent) -> bool {
        match self.0.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub fn channel() -> (EventSender, Receiver<NetworkEvent>) {
    let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
    (EventSender(tx), rx)
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Diagnostic-only reactor over Ethernet and IP events
pub struct EventDispatch<M> {
    mac_reader: M,
    telemetry: TelemetryHandle,
}

impl<M: MacReader> EventDispatch<M> {
    pub fn new(mac_reader: M) -> Self {
        Self {
            mac_reader,
            telemetry: TelemetryHandle::default(),
        }
    }

    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry.clone()
    }

    pub fn handle(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Eth { kind: EthEventKind::LinkUp, port } => {
                info!("Ethernet Link Up");
                let mac = match self.mac_reader.read_mac(port) {
                    Ok(mac) => {
                        info!("Ethernet HW Addr {}", format_mac(&mac));
                        Some(mac)
                    }
                    Err(e) => {
                        warn!("Could not read MAC address: {:#}", e);
                        None
                    }
                };
                self.telemetry.update(|t| {
                    t.link_up = true;
                    t.link_up_count += 1;
                    if mac.is_some() {
                        t.mac = mac;
                    }
                });
            }
            NetworkEvent::Eth { kind: EthEventKind::LinkDown, .. } => {
                info!("Ethernet Link Down");
                self.telemetry.update(|t| {
                    t.link_up = false;
                    t.link_down_count += 1;
                });
            }
            NetworkEvent::Eth { kind: EthEventKind::Started, .. } => {
                info!("Ethernet Started");
                self.telemetry.update(|t| t.started = true);
            }
            NetworkEvent::Eth { kind: EthEventKind::Stopped, .. } => {
                info!("Ethernet Stopped");
                self.telemetry.update(|t| {
                    t.started = false;
                    t.link_up = false;
                });
            }
            NetworkEvent::GotIp { ip, netmask, gateway } => {
                info!("Ethernet Got IP Address");
                info!("  IP: {}", ip);
                info!("  Mask: {}", netmask);
                info!("  Gateway: {}", gateway);
                self.telemetry.update(|t| t.ip = Some(IpObservation { ip, netmask, gateway }));
            }
        }
    }

    /// Drain `events` on a dedicated thread until every sender is gone
    pub fn spawn(self, events: Receiver<NetworkEvent>) -> std::io::Result<JoinHandle<()>>
    where
        M: 'static,
    {
        thread::Builder::new()
            .name("net-events".into())
            .stack_size(4096)
            .spawn(move || {
                info!("Network event task started");
                for event in events {
                    self.handle(event);
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x0a, 0xc4, 0x00, 0x01, 0xfe];

    struct FixedMac(Option<[u8; 6]>);

    impl MacReader for FixedMac {
        fn read_mac(&self, _port: PortToken) -> anyhow::Result<[u8; 6]> {
            self.0.ok_or_else(|| anyhow::anyhow!("ioctl failed"))
        }
    }

    fn link(kind: EthEventKind) -> NetworkEvent {
        NetworkEvent::Eth { kind, port: 0x3ffb_0000 }
    }

    #[test]
    fn test_link_up_records_mac() {
        let dispatch = EventDispatch::new(FixedMac(Some(MAC)));
        dispatch.handle(link(EthEventKind::Started));
        dispatch.handle(link(EthEventKind::LinkUp));

        let t = dispatch.telemetry().snapshot();
        assert!(t.started);
        assert!(t.link_up);
        assert_eq!(t.mac, Some(MAC));
        assert_eq!(t.link_up_count, 1);
    }

    #[test]
    fn test_link_down_and_stop() {
        let dispatch = EventDispatch::new(FixedMac(Some(MAC)));
        dispatch.handle(link(EthEventKind::LinkUp));
        dispatch.handle(link(EthEventKind::LinkDown));
        assert!(!dispatch.telemetry().snapshot().link_up);

        dispatch.handle(link(EthEventKind::Started));
        dispatch.handle(link(EthEventKind::Stopped));
        let t = dispatch.telemetry().snapshot();
        assert!(!t.started);
        assert_eq!(t.link_down_count, 1);
        assert_eq!(t.mac, Some(MAC));
    }

    #[test]
    fn test_mac_read_failure_still_marks_link_up() {
        let dispatch = EventDispatch::new(FixedMac(None));
        dispatch.handle(link(EthEventKind::LinkUp));

        let t = dispatch.telemetry().snapshot();
        assert!(t.link_up);
        assert_eq!(t.mac, None);
    }

    #[test]
    fn test_got_ip() {
        let dispatch = EventDispatch::new(FixedMac(None));
        dispatch.handle(NetworkEvent::GotIp {
            ip: Ipv4Addr::new(192, 168, 1, 77),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
        });

        let ip = dispatch.telemetry().snapshot().ip.unwrap();
        assert_eq!(ip.ip, Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(ip.gateway, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_spawned_dispatcher_drains_channel() {
        let (tx, rx) = channel();
        let dispatch = EventDispatch::new(FixedMac(Some(MAC)));
        let telemetry = dispatch.telemetry();
        let worker = dispatch.spawn(rx).unwrap();

        assert!(tx.post(link(EthEventKind::Started)));
        assert!(tx.post(link(EthEventKind::LinkUp)));
        drop(tx);
        worker.join().unwrap();

        let t = telemetry.snapshot();
        assert!(t.started && t.link_up);
    }

    #[test]
    fn test_post_never_blocks_when_full() {
        let (tx, _rx) = channel();
        for _ in 0..EVENT_QUEUE_DEPTH {
            assert!(tx.post(link(EthEventKind::LinkDown)));
        }
        assert!(!tx.post(link(EthEventKind::LinkDown)));
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&MAC), "24:0a:c4:00:01:fe");
    }
}
