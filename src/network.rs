//! Ethernet interface bring-up
//!
//! Turns the discovered Ethernet ports plus the loaded [`Settings`] into live,
//! addressed network interfaces.
//!
//! ## Single port
//!
//! One interface with default parameters. With `use_static_ip` the DHCP client is
//! stopped and IP, netmask, gateway, primary DNS and secondary DNS are applied in that
//! order. Each field is optional: empty or unparsable strings are skipped and the
//! interface keeps its current value for that field.
//!
//! ## Multiple ports
//!
//! One interface per port, keyed `ETH_<n>` / `eth<n>`, with route priority dropping by
//! [`ROUTE_PRIORITY_STEP`] per port so port 0 is always preferred. Static addressing
//! is not applied here regardless of `use_static_ip`.

use log::{debug, error, info, warn};
use std::net::Ipv4Addr;

use crate::config::Settings;

/// Route priority of the default Ethernet interface
pub const BASE_ROUTE_PRIORITY: u32 = 50;

/// Priority drop between consecutive ports
pub const ROUTE_PRIORITY_STEP: u32 = 5;

/// Parameters an interface is created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceTemplate {
    pub key: String,
    pub description: String,
    pub route_priority: u32,
}

impl InterfaceTemplate {
    /// Template for the only interface of a single-port board
    pub fn default_eth() -> Self {
        Self {
            key: "ETH_DEF".to_string(),
            description: "eth".to_string(),
            route_priority: BASE_ROUTE_PRIORITY,
        }
    }

    /// Template for port `index` of a multi-port board
    pub fn for_port(index: usize) -> Self {
        let step = ROUTE_PRIORITY_STEP.saturating_mul(index as u32);
        Self {
            key: format!("ETH_{}", index),
            description: format!("eth{}", index),
            route_priority: BASE_ROUTE_PRIORITY.saturating_sub(step),
        }
    }
}

/// IPv4 fields set through the interface's IP info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Ip,
    Netmask,
    Gateway,
}

/// Resolver slot for a DNS server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsSlot {
    Main,
    Backup,
}

/// A static-address field that was actually applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticField {
    Address(AddressField),
    Dns(DnsSlot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMode {
    Dhcp,
    Static { applied: Vec<StaticField> },
}

/// Hardware-side operations on a created interface
pub trait EthInterface {
    fn stop_dhcp_client(&mut self) -> anyhow::Result<()>;

    /// Overwrite one IP info field, leaving the others as they are
    fn set_address(&mut self, field: AddressField, value: Ipv4Addr) -> anyhow::Result<()>;

    fn set_dns(&mut self, slot: DnsSlot, server: Ipv4Addr) -> anyhow::Result<()>;

    /// Start the attached Ethernet driver
    fn start(&mut self) -> anyhow::Result<()>;
}

/// Creates interfaces and attaches port drivers to them
pub trait EthernetStack {
    /// Driver handle of one physical port
    type Port;
    type Interface: EthInterface;

    fn create_interface(
        &mut self,
        template: &InterfaceTemplate,
        port: Self::Port,
    ) -> anyhow::Result<Self::Interface>;
}

/// Fatal boot failures
#[derive(Debug)]
pub enum BootError {
    /// Ethernet driver layer could not be initialized
    DriverInit(anyhow::Error),
    /// TCP/IP interface runtime could not be initialized
    NetifRuntime(anyhow::Error),
    /// Creating or attaching the interface for a port failed
    Attach { port: usize, source: anyhow::Error },
    /// A port's driver refused to start
    DriverStart { port: usize, source: anyhow::Error },
}

impl std::fmt::Display for BootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootError::DriverInit(e) => write!(f, "Ethernet driver init failed: {:#}", e),
            BootError::NetifRuntime(e) => write!(f, "Network interface runtime init failed: {:#}", e),
            BootError::Attach { port, source } => {
                write!(f, "Attaching Ethernet port {} failed: {:#}", port, source)
            }
            BootError::DriverStart { port, source } => {
                write!(f, "Starting Ethernet port {} failed: {:#}", port, source)
            }
        }
    }
}

impl std::error::Error for BootError {}

/// A port paired with its interface. Lives until the device restarts.
#[derive(Debug)]
pub struct NetworkInterfaceBinding<I> {
    pub port: usize,
    pub template: InterfaceTemplate,
    pub address_mode: AddressMode,
    pub interface: I,
}

/// The live interfaces of this boot
pub struct NetworkBootstrap<I> {
    bindings: Vec<NetworkInterfaceBinding<I>>,
}

impl<I: EthInterface> NetworkBootstrap<I> {
    /// Create and attach one interface per port
    pub fn bring_up<S>(stack: &mut S, ports: Vec<S::Port>, settings: &Settings) -> Result<Self, BootError>
    where
        S: EthernetStack<Interface = I>,
    {
        if ports.is_empty() {
            return Err(BootError::DriverInit(anyhow::anyhow!("no Ethernet ports discovered")));
        }

        let port_count = ports.len();
        info!("Bringing up {} Ethernet port(s)", port_count);

        let mut bindings = Vec::with_capacity(port_count);

        if port_count == 1 {
            let template = InterfaceTemplate::default_eth();
            let mut ports = ports;
            let port = ports.remove(0);
            let mut interface = stack
                .create_interface(&template, port)
                .map_err(|source| BootError::Attach { port: 0, source })?;

            let address_mode = if settings.use_static_ip {
                info!("Using static IP configuration");
                AddressMode::Static {
                    applied: apply_static_address(&mut interface, settings),
                }
            } else {
                info!("Using DHCP");
                AddressMode::Dhcp
            };

            bindings.push(NetworkInterfaceBinding {
                port: 0,
                template,
                address_mode,
                interface,
            });
        } else {
            if settings.use_static_ip {
                warn!(
                    "Static IP is not supported with {} Ethernet ports, all ports use DHCP",
                    port_count
                );
            }
            for (index, port) in ports.into_iter().enumerate() {
                let template = InterfaceTemplate::for_port(index);
                debug!(
                    "Creating interface {} ({}) with route priority {}",
                    template.key, template.description, template.route_priority
                );
                let interface = stack
                    .create_interface(&template, port)
                    .map_err(|source| BootError::Attach { port: index, source })?;
                bindings.push(NetworkInterfaceBinding {
                    port: index,
                    template,
                    address_mode: AddressMode::Dhcp,
                    interface,
                });
            }
        }

        Ok(Self { bindings })
    }

    /// Start every port's driver state machine
    pub fn start_drivers(&mut self) -> Result<(), BootError> {
        for binding in &mut self.bindings {
            binding
                .interface
                .start()
                .map_err(|source| BootError::DriverStart { port: binding.port, source })?;
            info!("Ethernet port {} started", binding.port);
        }
        Ok(())
    }

    pub fn bindings(&self) -> &[NetworkInterfaceBinding<I>] {
        &self.bindings
    }
}

/// Parse an optional dotted-quad; empty means not configured
fn parse_optional_addr(label: &str, raw: &str) -> Option<Ipv4Addr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<Ipv4Addr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!("Ignoring invalid {} '{}'", label, raw);
            None
        }
    }
}

/// Apply whatever static fields are usable; failures are logged and skipped
fn apply_static_address<I: EthInterface>(interface: &mut I, settings: &Settings) -> Vec<StaticField> {
    if let Err(e) = interface.stop_dhcp_client() {
        warn!("Failed to stop DHCP client: {:#}", e);
    }

    let mut applied = Vec::new();

    let addresses = [
        (AddressField::Ip, "IP address", settings.ip_address.as_str()),
        (AddressField::Netmask, "netmask", settings.netmask.as_str()),
        (AddressField::Gateway, "gateway", settings.gateway.as_str()),
    ];
    for (field, label, raw) in addresses {
        let Some(addr) = parse_optional_addr(label, raw) else {
            continue;
        };
        match interface.set_address(field, addr) {
            Ok(()) => {
                info!("  {}: {}", label, addr);
                applied.push(StaticField::Address(field));
            }
            Err(e) => error!("Failed to set {} {}: {:#}", label, addr, e),
        }
    }

    let servers = [
        (DnsSlot::Main, "primary DNS", settings.dns_primary.as_str()),
        (DnsSlot::Backup, "secondary DNS", settings.dns_secondary.as_str()),
    ];
    for (slot, label, raw) in servers {
        let Some(addr) = parse_optional_addr(label, raw) else {
            continue;
        };
        match interface.set_dns(slot, addr) {
            Ok(()) => {
                info!("  {}: {}", label, addr);
                applied.push(StaticField::Dns(slot));
            }
            Err(e) => error!("Failed to set {} {}: {:#}", label, addr, e),
        }
    }

    applied
}
