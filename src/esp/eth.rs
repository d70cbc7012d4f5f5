//! Ethernet port discovery and esp-netif interfaces
//!
//! Board wiring is the common LAN8720/IP101 RMII layout with the PHY clock on GPIO17
//! and PHY reset on GPIO5. The ESP32 has a single EMAC, so discovery yields one port.

use anyhow::{anyhow, Context};
use esp_idf_svc::eth::{EspEth, EthDriver, RmiiClockConfig, RmiiEth, RmiiEthChipset};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio;
use esp_idf_svc::hal::mac::MAC;
use esp_idf_svc::netif::{EspNetif, NetifConfiguration};
use esp_idf_svc::sys::{
    esp, esp_ip4_addr_t, esp_netif_dhcpc_stop, esp_netif_dns_info_t,
    esp_netif_dns_type_t_ESP_NETIF_DNS_BACKUP, esp_netif_dns_type_t_ESP_NETIF_DNS_MAIN,
    esp_netif_get_ip_info, esp_netif_ip_info_t, esp_netif_set_dns_info, esp_netif_set_ip_info,
    ESP_IPADDR_TYPE_V4,
};
use log::info;
use std::net::Ipv4Addr;

use crate::network::{AddressField, BootError, DnsSlot, EthInterface, EthernetStack, InterfaceTemplate};

pub type EthPort = EthDriver<'static, RmiiEth>;

/// RMII pins of the on-board PHY
pub struct RmiiPins {
    pub rxd0: gpio::Gpio25,
    pub rxd1: gpio::Gpio26,
    pub crs_dv: gpio::Gpio27,
    pub mdc: gpio::Gpio23,
    pub txd1: gpio::Gpio22,
    pub tx_en: gpio::Gpio21,
    pub txd0: gpio::Gpio19,
    pub mdio: gpio::Gpio18,
    pub clk: gpio::Gpio17,
    pub phy_reset: gpio::Gpio5,
}

/// Install the Ethernet driver for every port on the board
pub fn discover_ports(
    mac: MAC,
    pins: RmiiPins,
    sys_loop: EspSystemEventLoop,
) -> Result<Vec<EthPort>, BootError> {
    let driver = EthDriver::new_rmii(
        mac,
        pins.rxd0,
        pins.rxd1,
        pins.crs_dv,
        pins.mdc,
        pins.txd1,
        pins.tx_en,
        pins.txd0,
        pins.mdio,
        RmiiClockConfig::<gpio::Gpio0, gpio::Gpio16, gpio::Gpio17>::OutputInvertedGpio17(pins.clk),
        Some(pins.phy_reset),
        RmiiEthChipset::IP101,
        None,
        sys_loop,
    )
    .map_err(|e| BootError::DriverInit(e.into()))?;

    info!("Ethernet driver installed");
    Ok(vec![driver])
}

fn ipv4_to_esp(addr: Ipv4Addr) -> esp_ip4_addr_t {
    // lwIP keeps addresses in network byte order
    esp_ip4_addr_t {
        addr: u32::from_ne_bytes(addr.octets()),
    }
}

/// Creates one esp-netif per port and attaches the driver to it
pub struct EspEthStack;

impl EthernetStack for EspEthStack {
    type Port = EthPort;
    type Interface = EspEthInterface;

    fn create_interface(&mut self, template: &InterfaceTemplate, port: EthPort) -> anyhow::Result<EspEthInterface> {
        let conf = NetifConfiguration {
            key: template
                .key
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("interface key '{}' too long", template.key))?,
            description: template
                .description
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("interface description '{}' too long", template.description))?,
            route_priority: template.route_priority,
            ..NetifConfiguration::eth_default_client()
        };
        let netif = EspNetif::new_with_conf(&conf).context("creating network interface")?;
        let eth = EspEth::wrap_all(port, netif).context("attaching Ethernet driver")?;
        Ok(EspEthInterface { eth })
    }
}

pub struct EspEthInterface {
    eth: EspEth<'static, RmiiEth>,
}

impl EthInterface for EspEthInterface {
    fn stop_dhcp_client(&mut self) -> anyhow::Result<()> {
        esp!(unsafe { esp_netif_dhcpc_stop(self.eth.netif().handle()) })?;
        Ok(())
    }

    fn set_address(&mut self, field: AddressField, value: Ipv4Addr) -> anyhow::Result<()> {
        let handle = self.eth.netif().handle();
        let mut ip_info: esp_netif_ip_info_t = Default::default();
        esp!(unsafe { esp_netif_get_ip_info(handle, &mut ip_info) })?;

        let addr = ipv4_to_esp(value);
        match field {
            AddressField::Ip => ip_info.ip = addr,
            AddressField::Netmask => ip_info.netmask = addr,
            AddressField::Gateway => ip_info.gw = addr,
        }

        esp!(unsafe { esp_netif_set_ip_info(handle, &ip_info) })?;
        Ok(())
    }

    fn set_dns(&mut self, slot: DnsSlot, server: Ipv4Addr) -> anyhow::Result<()> {
        let mut dns: esp_netif_dns_info_t = Default::default();
        dns.ip.type_ = ESP_IPADDR_TYPE_V4 as _;
        dns.ip.u_addr.ip4 = ipv4_to_esp(server);

        let kind = match slot {
            DnsSlot::Main => esp_netif_dns_type_t_ESP_NETIF_DNS_MAIN,
            DnsSlot::Backup => esp_netif_dns_type_t_ESP_NETIF_DNS_BACKUP,
        };
        esp!(unsafe { esp_netif_set_dns_info(self.eth.netif().handle(), kind, &mut dns) })?;
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.eth.start()?;
        Ok(())
    }
}
