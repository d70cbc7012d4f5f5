//! Ethernet to UART bridge firmware
//!
//! Boot order:
//! 1. load settings from NVS
//! 2. bring up the Ethernet interface(s) with those settings
//! 3. start the network event dispatcher and the Ethernet drivers
//! 4. start the config-mode gate
//! 5. hand the settings to the TCP/UART bridge

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::gpio::{AnyIOPin, PinDriver, Pull};
    use esp_idf_svc::hal::prelude::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info};
    use std::thread;
    use std::time::Duration;

    use eth_uart_bridge::bridge::BridgeService;
    use eth_uart_bridge::config::{SettingsStore, DEFAULT_CONFIG_GPIO};
    use eth_uart_bridge::config_mode::ConfigModeGate;
    use eth_uart_bridge::esp::eth::RmiiPins;
    use eth_uart_bridge::esp::{self, EspConfigServer, EspEthStack, EspMacReader, NvsStorage, TcpServerComponent};
    use eth_uart_bridge::events::{self, EventDispatch};
    use eth_uart_bridge::network::{BootError, NetworkBootstrap};
    use eth_uart_bridge::web::ConfigWebServer;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // Set up panic handler for automatic restart
    std::panic::set_hook(Box::new(|panic_info| {
        error!("PANIC: {}", panic_info);
        error!("Restarting in 3 seconds...");
        thread::sleep(Duration::from_secs(3));
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }));

    info!("==============================================");
    info!("        Ethernet <-> UART bridge");
    info!("==============================================");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take().map_err(|e| BootError::NetifRuntime(e.into()))?;
    let nvs = EspDefaultNvsPartition::take()?;

    let store = SettingsStore::new(NvsStorage::new(nvs));
    let settings = store.load();

    info!("Settings loaded:");
    info!("  UART baud rate: {}", settings.serial_baud_rate);
    info!("  TCP port: {}", settings.tcp_port);
    info!("  Addressing: {}", if settings.use_static_ip { "static" } else { "DHCP" });

    let pins = peripherals.pins;
    let ports = esp::discover_ports(
        peripherals.mac,
        RmiiPins {
            rxd0: pins.gpio25,
            rxd1: pins.gpio26,
            crs_dv: pins.gpio27,
            mdc: pins.gpio23,
            txd1: pins.gpio22,
            tx_en: pins.gpio21,
            txd0: pins.gpio19,
            mdio: pins.gpio18,
            clk: pins.gpio17,
            phy_reset: pins.gpio5,
        },
        sys_loop.clone(),
    )?;

    let mut network = NetworkBootstrap::bring_up(&mut EspEthStack, ports, &settings)?;

    let (event_tx, event_rx) = events::channel();
    let dispatch = EventDispatch::new(EspMacReader);
    let telemetry = dispatch.telemetry();
    dispatch.spawn(event_rx)?;
    let _subscriptions = esp::subscribe(&sys_loop, event_tx)?;

    network.start_drivers()?;

    // SAFETY: `config::is_usable_config_gpio` rejects the RMII pins claimed above at compile time.
    let config_pin = unsafe { AnyIOPin::new(DEFAULT_CONFIG_GPIO as _) };
    let mut button = PinDriver::input(config_pin)?;
    button.set_pull(Pull::Up)?;
    info!("Config button on GPIO{}", DEFAULT_CONFIG_GPIO);

    ConfigModeGate::spawn(move || ConfigModeGate::new(button, ConfigWebServer::new(EspConfigServer::new(store))))?;

    TcpServerComponent.start(&settings);

    // The interfaces stop when `network` is dropped.
    loop {
        thread::sleep(Duration::from_secs(60));
        let link = telemetry.snapshot();
        log::debug!(
            "{} interface(s), link {}, {} link drop(s)",
            network.bindings().len(),
            if link.link_up { "up" } else { "down" },
            link.link_down_count
        );
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("eth-uart-bridge only runs on ESP-IDF targets; run `cargo test` for the host-side logic")
}
