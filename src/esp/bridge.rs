//! Link to the `tcp_server` ESP-IDF component

use log::info;

use crate::bridge::{BridgeService, BridgeSettingsRecord};
use crate::config::Settings;

extern "C" {
    fn tcp_server_create(settings: *const BridgeSettingsRecord);
}

pub struct TcpServerComponent;

impl BridgeService for TcpServerComponent {
    fn start(&mut self, settings: &Settings) {
        info!(
            "Starting TCP/UART bridge on port {} at {} baud",
            settings.tcp_port, settings.serial_baud_rate
        );
        // The component keeps the pointer, so the record lives for the rest of the boot.
        let record: &'static BridgeSettingsRecord = Box::leak(Box::new(BridgeSettingsRecord::from(settings)));
        // SAFETY: `record` is a valid, never-freed settings_t.
        unsafe { tcp_server_create(record) };
    }
}
