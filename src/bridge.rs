//! Hand-off to the TCP/UART bridge
//!
//! The bridge itself (TCP listener plus UART relay) is an external component. It is
//! started once at the end of boot with the resolved [`Settings`] and owns its own
//! tasks from then on.

use crate::config::{AddrString, Settings};

/// Size of each address buffer in [`BridgeSettingsRecord`], terminator included
pub const ADDR_BUF_LEN: usize = 16;

/// Something that takes over the TCP/UART relay
pub trait BridgeService {
    /// Fire and forget; nothing is returned to the boot sequence
    fn start(&mut self, settings: &Settings);
}

/// C layout of the settings record the bridge component reads
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettingsRecord {
    pub uart_baud_rate: i32,
    pub tcp_port: i32,
    pub use_static_ip: i32,
    pub ip_addr: [u8; ADDR_BUF_LEN],
    pub netmask: [u8; ADDR_BUF_LEN],
    pub gateway: [u8; ADDR_BUF_LEN],
    pub dns1: [u8; ADDR_BUF_LEN],
    pub dns2: [u8; ADDR_BUF_LEN],
}

/// NUL-terminated copy of an address string
fn c_addr(value: &AddrString) -> [u8; ADDR_BUF_LEN] {
    let mut buf = [0u8; ADDR_BUF_LEN];
    // AddrString holds at most 15 bytes, so the last byte stays 0.
    let bytes = value.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

impl From<&Settings> for BridgeSettingsRecord {
    fn from(settings: &Settings) -> Self {
        Self {
            uart_baud_rate: i32::try_from(settings.serial_baud_rate).unwrap_or(i32::MAX),
            tcp_port: i32::from(settings.tcp_port),
            use_static_ip: i32::from(settings.use_static_ip),
            ip_addr: c_addr(&settings.ip_address),
            netmask: c_addr(&settings.netmask),
            gateway: c_addr(&settings.gateway),
            dns1: c_addr(&settings.dns_primary),
            dns2: c_addr(&settings.dns_secondary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::addr_string;

    #[test]
    fn test_record_from_settings() {
        let settings = Settings {
            serial_baud_rate: 921600,
            tcp_port: 8880,
            use_static_ip: true,
            ip_address: addr_string("192.168.100.200"),
            dns_primary: addr_string("1.1.1.1"),
            ..Settings::default()
        };
        let record = BridgeSettingsRecord::from(&settings);

        assert_eq!(record.uart_baud_rate, 921600);
        assert_eq!(record.tcp_port, 8880);
        assert_eq!(record.use_static_ip, 1);
        assert_eq!(&record.ip_addr[..15], b"192.168.100.200");
        assert_eq!(record.ip_addr[15], 0);
        assert_eq!(&record.dns1[..8], b"1.1.1.1\0");
        assert_eq!(record.gateway, [0u8; ADDR_BUF_LEN]);
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<BridgeSettingsRecord>(), 3 * 4 + 5 * ADDR_BUF_LEN);
    }
}
