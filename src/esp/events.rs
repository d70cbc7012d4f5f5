//! System event loop hooks
//!
//! The subscriptions run on the default event loop task and only translate the
//! payload and post it to the dispatcher.

use core::ffi::c_void;
use esp_idf_svc::eth::EthEvent;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::sys::{esp, esp_eth_handle_t, esp_eth_io_cmd_t_ETH_CMD_G_MAC_ADDR, esp_eth_ioctl};
use std::net::Ipv4Addr;

use crate::events::{EthEventKind, EventSender, MacReader, NetworkEvent, PortToken};

/// Keeps the Ethernet and IP handlers registered while alive
pub struct EventSubscriptions {
    _eth: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

/// Forward Ethernet link events and DHCP address assignments to `events`
pub fn subscribe(sys_loop: &EspSystemEventLoop, events: EventSender) -> anyhow::Result<EventSubscriptions> {
    let eth_events = events.clone();
    let eth = sys_loop.subscribe::<EthEvent, _>(move |event| {
        let (kind, handle) = match event {
            EthEvent::Started(handle) => (EthEventKind::Started, handle),
            EthEvent::Stopped(handle) => (EthEventKind::Stopped, handle),
            EthEvent::Connected(handle) => (EthEventKind::LinkUp, handle),
            EthEvent::Disconnected(handle) => (EthEventKind::LinkDown, handle),
        };
        eth_events.post(NetworkEvent::Eth {
            kind,
            port: handle as PortToken,
        });
    })?;

    let ip = sys_loop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            let info = assignment.ip_info();
            events.post(NetworkEvent::GotIp {
                ip: info.ip,
                netmask: Ipv4Addr::from(info.subnet.mask),
                gateway: info.subnet.gateway,
            });
        }
    })?;

    Ok(EventSubscriptions { _eth: eth, _ip: ip })
}

/// Reads the MAC through the Ethernet driver of the port that raised the event
pub struct EspMacReader;

impl MacReader for EspMacReader {
    fn read_mac(&self, port: PortToken) -> anyhow::Result<[u8; 6]> {
        let mut mac = [0u8; 6];
        // SAFETY: `port` is the driver handle carried by an EthEvent and the buffer
        // holds the 6 bytes ETH_CMD_G_MAC_ADDR writes.
        esp!(unsafe {
            esp_eth_ioctl(
                port as esp_eth_handle_t,
                esp_eth_io_cmd_t_ETH_CMD_G_MAC_ADDR,
                mac.as_mut_ptr() as *mut c_void,
            )
        })?;
        Ok(mac)
    }
}
