//! Bridge settings with NVS persistence
//!
//! Settings live in the `bridge_cfg` NVS namespace and survive reboots. Every field
//! is resolved independently on load: a missing or unreadable key falls back to its
//! build default, so a partial record still yields a complete [`Settings`].
//!
//! Saving writes the numeric fields unconditionally but skips empty address strings.
//! A blank field therefore keeps whatever was stored before; clearing an address
//! takes [`SettingsStore::reset`].

use log::{debug, error, info, warn};

use crate::storage::{StorageBackend, StorageNamespace};

/// NVS namespace for bridge configuration
pub const NVS_NAMESPACE: &str = "bridge_cfg";

/// Longest dotted-quad string ("255.255.255.255")
pub const MAX_ADDR_LEN: usize = 15;

/// Fixed-capacity address string as stored in NVS
pub type AddrString = heapless::String<MAX_ADDR_LEN>;

/// NVS keys for configuration values
pub mod nvs_keys {
    pub const BAUD_RATE: &str = "baud_rate";
    pub const TCP_PORT: &str = "tcp_port";
    pub const USE_STATIC_IP: &str = "use_static_ip";
    pub const IP_ADDR: &str = "ip_addr";
    pub const NETMASK: &str = "netmask";
    pub const GATEWAY: &str = "gateway";
    pub const DNS1: &str = "dns1";
    pub const DNS2: &str = "dns2";

    pub const ALL: [&str; 8] = [
        BAUD_RATE,
        TCP_PORT,
        USE_STATIC_IP,
        IP_ADDR,
        NETMASK,
        GATEWAY,
        DNS1,
        DNS2,
    ];
}

/// UART baud rate used when none is stored (`BRIDGE_UART_BAUD_RATE` at build time)
pub const DEFAULT_UART_BAUD_RATE: u32 =
    nonzero_or(env_u32(option_env!("BRIDGE_UART_BAUD_RATE")), 115_200);

/// TCP listen port used when none is stored (`BRIDGE_TCP_PORT` at build time)
pub const DEFAULT_TCP_PORT: u16 = port_or(env_u32(option_env!("BRIDGE_TCP_PORT")), 3333);

/// GPIO sampled by the config-mode gate (`BRIDGE_CONFIG_GPIO` at build time)
pub const DEFAULT_CONFIG_GPIO: i32 = match env_u32(option_env!("BRIDGE_CONFIG_GPIO")) {
    Some(pin) if pin < 64 => pin as i32,
    _ => 0,
};

/// GPIOs owned by the RMII PHY (see `esp::eth::RmiiPins`)
pub const RMII_GPIOS: [i32; 10] = [5, 17, 18, 19, 21, 22, 23, 25, 26, 27];

/// Whether `pin` can serve as the pulled-up config button. Excludes the RMII pins,
/// the SPI flash pins 6-11, and the input-only pins 34-39, which have no pull-up.
pub const fn is_usable_config_gpio(pin: i32) -> bool {
    if pin < 0 || pin > 33 || (pin >= 6 && pin <= 11) {
        return false;
    }
    let mut i = 0;
    while i < RMII_GPIOS.len() {
        if RMII_GPIOS[i] == pin {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    is_usable_config_gpio(DEFAULT_CONFIG_GPIO),
    "BRIDGE_CONFIG_GPIO must be a free, pull-up capable GPIO"
);

/// Parse a decimal build-time value; anything malformed reads as unset
const fn env_u32(value: Option<&str>) -> Option<u32> {
    let bytes = match value {
        Some(v) => v.as_bytes(),
        None => return None,
    };
    if bytes.is_empty() {
        return None;
    }
    let mut acc: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            return None;
        }
        acc = match acc.checked_mul(10) {
            Some(v) => v,
            None => return None,
        };
        acc = match acc.checked_add((b - b'0') as u32) {
            Some(v) => v,
            None => return None,
        };
        i += 1;
    }
    Some(acc)
}

const fn nonzero_or(value: Option<u32>, fallback: u32) -> u32 {
    match value {
        Some(v) if v > 0 && v <= i32::MAX as u32 => v,
        _ => fallback,
    }
}

const fn port_or(value: Option<u32>, fallback: u16) -> u16 {
    match value {
        Some(v) if v > 0 && v <= u16::MAX as u32 => v as u16,
        _ => fallback,
    }
}

/// Build an [`AddrString`], truncating at a char boundary if needed
pub fn addr_string(value: &str) -> AddrString {
    let mut end = value.len().min(MAX_ADDR_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = AddrString::new();
    // Cannot fail: `end` is within capacity.
    let _ = out.push_str(&value[..end]);
    out
}

/// Bridge configuration settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // Serial / TCP
    pub serial_baud_rate: u32,
    pub tcp_port: u16,

    // Ethernet addressing (DHCP unless use_static_ip)
    pub use_static_ip: bool,
    pub ip_address: AddrString,
    pub netmask: AddrString,
    pub gateway: AddrString,
    pub dns_primary: AddrString,
    pub dns_secondary: AddrString,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_baud_rate: DEFAULT_UART_BAUD_RATE,
            tcp_port: DEFAULT_TCP_PORT,
            use_static_ip: false,
            ip_address: AddrString::new(),
            netmask: AddrString::new(),
            gateway: AddrString::new(),
            dns_primary: AddrString::new(),
            dns_secondary: AddrString::new(),
        }
    }
}

impl Settings {
    /// Address fields paired with their NVS keys, in storage order
    fn address_fields(&self) -> [(&'static str, &AddrString); 5] {
        [
            (nvs_keys::IP_ADDR, &self.ip_address),
            (nvs_keys::NETMASK, &self.netmask),
            (nvs_keys::GATEWAY, &self.gateway),
            (nvs_keys::DNS1, &self.dns_primary),
            (nvs_keys::DNS2, &self.dns_secondary),
        ]
    }

    fn address_field_mut(&mut self, key: &str) -> Option<&mut AddrString> {
        match key {
            nvs_keys::IP_ADDR => Some(&mut self.ip_address),
            nvs_keys::NETMASK => Some(&mut self.netmask),
            nvs_keys::GATEWAY => Some(&mut self.gateway),
            nvs_keys::DNS1 => Some(&mut self.dns_primary),
            nvs_keys::DNS2 => Some(&mut self.dns_secondary),
            _ => None,
        }
    }
}

/// Errors returned by [`SettingsStore::save`] and [`SettingsStore::reset`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The namespace could not be opened; nothing was written
    Unavailable(String),
    /// Commit failed after all field writes were attempted
    WriteFailed { reason: String, report: SaveReport },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "Settings store unavailable: {}", reason),
            StoreError::WriteFailed { reason, .. } => {
                write!(f, "Settings commit failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Which fields a save touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub written: Vec<&'static str>,
    /// Empty strings left at their previously stored value
    pub skipped: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Where each loaded field came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub from_store: Vec<&'static str>,
    pub defaulted: Vec<&'static str>,
}

impl LoadReport {
    fn record(&mut self, key: &'static str, from_store: bool) {
        if from_store {
            debug!("  {}: from NVS", key);
            self.from_store.push(key);
        } else {
            debug!("  {}: default", key);
            self.defaulted.push(key);
        }
    }
}

/// Persisted settings record
///
/// Cheap to clone when the backend is; every handle talks to the same storage,
/// which serializes concurrent access.
#[derive(Clone)]
pub struct SettingsStore<B> {
    backend: B,
}

impl<B: StorageBackend> SettingsStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Load settings, substituting the default for any field that cannot be read
    pub fn load(&self) -> Settings {
        self.load_with_report().0
    }

    /// [`load`](Self::load), also reporting where each field came from
    pub fn load_with_report(&self) -> (Settings, LoadReport) {
        let mut settings = Settings::default();
        let mut report = LoadReport::default();

        let nvs = match self.backend.open(NVS_NAMESPACE) {
            Ok(nvs) => nvs,
            Err(e) => {
                error!("Error opening settings namespace, using defaults: {:#}", e);
                report.defaulted.extend(nvs_keys::ALL);
                return (settings, report);
            }
        };

        let baud_from_store = match nvs.get_i32(nvs_keys::BAUD_RATE) {
            Ok(Some(baud)) if baud > 0 => {
                settings.serial_baud_rate = baud as u32;
                true
            }
            Ok(Some(baud)) => {
                warn!("Stored baud rate {} is invalid, using default", baud);
                false
            }
            Ok(None) => {
                warn!("Baud rate not found in NVS, using default");
                false
            }
            Err(e) => {
                error!("Error getting baud rate from NVS: {:#}", e);
                false
            }
        };
        report.record(nvs_keys::BAUD_RATE, baud_from_store);

        let port_from_store = match nvs.get_i32(nvs_keys::TCP_PORT) {
            Ok(Some(port)) => match u16::try_from(port) {
                Ok(port) if port > 0 => {
                    settings.tcp_port = port;
                    true
                }
                _ => {
                    warn!("Stored TCP port {} is out of range, using default", port);
                    false
                }
            },
            Ok(None) => {
                warn!("TCP port not found in NVS, using default");
                false
            }
            Err(e) => {
                error!("Error getting TCP port from NVS: {:#}", e);
                false
            }
        };
        report.record(nvs_keys::TCP_PORT, port_from_store);

        let static_from_store = match nvs.get_i32(nvs_keys::USE_STATIC_IP) {
            Ok(Some(flag)) => {
                settings.use_static_ip = flag != 0;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("Error getting use_static_ip from NVS: {:#}", e);
                false
            }
        };
        report.record(nvs_keys::USE_STATIC_IP, static_from_store);

        for key in [
            nvs_keys::IP_ADDR,
            nvs_keys::NETMASK,
            nvs_keys::GATEWAY,
            nvs_keys::DNS1,
            nvs_keys::DNS2,
        ] {
            let (value, from_store) = match nvs.get_str(key, MAX_ADDR_LEN) {
                Ok(Some(s)) => (addr_string(&s), true),
                Ok(None) => (AddrString::new(), false),
                Err(e) => {
                    warn!("Invalid {} in NVS, clearing: {:#}", key, e);
                    (AddrString::new(), false)
                }
            };
            if let Some(field) = settings.address_field_mut(key) {
                *field = value;
            }
            report.record(key, from_store);
        }

        debug!("Settings loaded: {:?}", settings);
        (settings, report)
    }

    /// Save settings
    ///
    /// Field write failures are logged and do not stop the remaining writes; only an
    /// open or commit failure is returned as an error.
    pub fn save(&self, settings: &Settings) -> Result<SaveReport, StoreError> {
        let mut nvs = self.backend.open(NVS_NAMESPACE).map_err(|e| {
            error!("Error opening settings namespace: {:#}", e);
            StoreError::Unavailable(format!("{:#}", e))
        })?;

        info!("Saving settings to NVS...");
        let mut report = SaveReport::default();

        let numeric = [
            (nvs_keys::BAUD_RATE, i32::try_from(settings.serial_baud_rate).ok()),
            (nvs_keys::TCP_PORT, Some(i32::from(settings.tcp_port))),
            (nvs_keys::USE_STATIC_IP, Some(i32::from(settings.use_static_ip))),
        ];
        for (key, value) in numeric {
            let result = match value {
                Some(v) => nvs.set_i32(key, v),
                None => Err(anyhow::anyhow!("value does not fit an int32")),
            };
            match result {
                Ok(()) => report.written.push(key),
                Err(e) => {
                    error!("Error setting {} in NVS: {:#}", key, e);
                    report.failed.push(key);
                }
            }
        }

        for (key, value) in settings.address_fields() {
            if value.is_empty() {
                report.skipped.push(key);
                continue;
            }
            match nvs.set_str(key, value.as_str()) {
                Ok(()) => report.written.push(key),
                Err(e) => {
                    error!("Error setting {} in NVS: {:#}", key, e);
                    report.failed.push(key);
                }
            }
        }

        if let Err(e) = nvs.commit() {
            error!("Error committing NVS changes: {:#}", e);
            return Err(StoreError::WriteFailed {
                reason: format!("{:#}", e),
                report,
            });
        }

        if report.is_complete() {
            info!("Settings saved to NVS");
        } else {
            warn!("Settings saved to NVS with failed fields: {:?}", report.failed);
        }
        Ok(report)
    }

    /// Erase every stored field; the next load returns defaults
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut nvs = self
            .backend
            .open(NVS_NAMESPACE)
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))?;
        nvs.erase_all()
            .and_then(|_| nvs.commit())
            .map_err(|e| StoreError::WriteFailed {
                reason: format!("{:#}", e),
                report: SaveReport::default(),
            })?;
        info!("Settings cleared - defaults apply on next boot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageFaults, StoredValue};

    fn store() -> (MemoryStorage, SettingsStore<MemoryStorage>) {
        let storage = MemoryStorage::new();
        (storage.clone(), SettingsStore::new(storage))
    }

    fn static_settings() -> Settings {
        Settings {
            serial_baud_rate: 9600,
            tcp_port: 4000,
            use_static_ip: true,
            ip_address: addr_string("192.168.1.50"),
            netmask: addr_string("255.255.255.0"),
            gateway: addr_string("192.168.1.1"),
            dns_primary: addr_string("8.8.8.8"),
            dns_secondary: addr_string("1.1.1.1"),
        }
    }

    #[test]
    fn test_empty_store_loads_defaults() {
        let (_, store) = store();
        let settings = store.load();

        assert_eq!(settings.serial_baud_rate, DEFAULT_UART_BAUD_RATE);
        assert_eq!(settings.tcp_port, DEFAULT_TCP_PORT);
        assert!(!settings.use_static_ip);
        assert!(settings.ip_address.is_empty());
        assert!(settings.netmask.is_empty());
        assert!(settings.gateway.is_empty());
        assert!(settings.dns_primary.is_empty());
        assert!(settings.dns_secondary.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_, store) = store();
        let saved = static_settings();

        let report = store.save(&saved).unwrap();
        assert!(report.is_complete());
        assert!(report.skipped.is_empty());

        let loaded = store.load();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_empty_string_does_not_clear_previous_value() {
        let (_, store) = store();
        store.save(&static_settings()).unwrap();

        let mut cleared = static_settings();
        cleared.ip_address = AddrString::new();
        let report = store.save(&cleared).unwrap();
        assert_eq!(report.skipped, vec![nvs_keys::IP_ADDR]);

        assert_eq!(store.load().ip_address.as_str(), "192.168.1.50");
    }

    #[test]
    fn test_partial_record() {
        let (storage, store) = store();
        storage.insert(NVS_NAMESPACE, nvs_keys::BAUD_RATE, StoredValue::I32(57600));

        let settings = store.load();
        assert_eq!(settings.serial_baud_rate, 57600);
        assert_eq!(settings.tcp_port, DEFAULT_TCP_PORT);
    }

    #[test]
    fn test_load_report_field_sources() {
        let (storage, store) = store();
        storage.insert(NVS_NAMESPACE, nvs_keys::BAUD_RATE, StoredValue::I32(57600));
        storage.insert(NVS_NAMESPACE, nvs_keys::TCP_PORT, StoredValue::I32(0));
        storage.insert(NVS_NAMESPACE, nvs_keys::GATEWAY, StoredValue::Str("10.0.0.1".into()));

        let (settings, report) = store.load_with_report();
        assert_eq!(settings.gateway.as_str(), "10.0.0.1");
        assert_eq!(report.from_store, vec![nvs_keys::BAUD_RATE, nvs_keys::GATEWAY]);
        assert_eq!(
            report.defaulted,
            vec![
                nvs_keys::TCP_PORT,
                nvs_keys::USE_STATIC_IP,
                nvs_keys::IP_ADDR,
                nvs_keys::NETMASK,
                nvs_keys::DNS1,
                nvs_keys::DNS2,
            ]
        );

        storage.set_faults(StorageFaults { fail_open: true, ..Default::default() });
        let (_, report) = store.load_with_report();
        assert!(report.from_store.is_empty());
        assert_eq!(report.defaulted.len(), nvs_keys::ALL.len());
    }

    #[test]
    fn test_corrupt_fields_fall_back() {
        let (storage, store) = store();
        storage.insert(NVS_NAMESPACE, nvs_keys::TCP_PORT, StoredValue::I32(70000));
        storage.insert(NVS_NAMESPACE, nvs_keys::BAUD_RATE, StoredValue::I32(-5));
        storage.insert(NVS_NAMESPACE, nvs_keys::GATEWAY, StoredValue::Str("10.0.0.1.0.0.0.1".into()));
        storage.insert(NVS_NAMESPACE, nvs_keys::DNS1, StoredValue::I32(1));
        storage.insert(NVS_NAMESPACE, nvs_keys::NETMASK, StoredValue::Str("255.0.0.0".into()));

        let settings = store.load();
        assert_eq!(settings.tcp_port, DEFAULT_TCP_PORT);
        assert_eq!(settings.serial_baud_rate, DEFAULT_UART_BAUD_RATE);
        assert!(settings.gateway.is_empty());
        assert!(settings.dns_primary.is_empty());
        assert_eq!(settings.netmask.as_str(), "255.0.0.0");
    }

    #[test]
    fn test_read_error_uses_default() {
        let (storage, store) = store();
        store.save(&static_settings()).unwrap();
        storage.set_faults(StorageFaults {
            fail_read: vec![nvs_keys::TCP_PORT, nvs_keys::IP_ADDR],
            ..Default::default()
        });

        let settings = store.load();
        assert_eq!(settings.tcp_port, DEFAULT_TCP_PORT);
        assert!(settings.ip_address.is_empty());
        assert_eq!(settings.serial_baud_rate, 9600);
    }

    #[test]
    fn test_unavailable_store() {
        let (storage, store) = store();
        storage.set_faults(StorageFaults { fail_open: true, ..Default::default() });

        assert_eq!(store.load(), Settings::default());
        assert!(matches!(
            store.save(&static_settings()),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_field_write_failure_continues() {
        let (storage, store) = store();
        storage.set_faults(StorageFaults {
            fail_write: vec![nvs_keys::TCP_PORT],
            ..Default::default()
        });

        let report = store.save(&static_settings()).unwrap();
        assert_eq!(report.failed, vec![nvs_keys::TCP_PORT]);
        assert!(report.written.contains(&nvs_keys::DNS2));
        assert_eq!(
            storage.get(NVS_NAMESPACE, nvs_keys::BAUD_RATE),
            Some(StoredValue::I32(9600))
        );
        assert_eq!(storage.get(NVS_NAMESPACE, nvs_keys::TCP_PORT), None);
    }

    #[test]
    fn test_commit_failure_reports_attempted_fields() {
        let (storage, store) = store();
        storage.set_faults(StorageFaults { fail_commit: true, ..Default::default() });

        match store.save(&static_settings()) {
            Err(StoreError::WriteFailed { report, .. }) => {
                assert_eq!(report.written.len(), 8);
            }
            other => panic!("expected WriteFailed, got {:?}", other),
        }
        assert_eq!(storage.key_count(NVS_NAMESPACE), 0);
    }

    #[test]
    fn test_reset_clears_addresses() {
        let (_, store) = store();
        store.save(&static_settings()).unwrap();

        store.reset().unwrap();
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_addr_string_truncates() {
        assert_eq!(addr_string("192.168.100.1001").as_str(), "192.168.100.100");
        assert_eq!(addr_string("").as_str(), "");
    }

    #[test]
    fn test_config_gpio_choice() {
        assert!(is_usable_config_gpio(DEFAULT_CONFIG_GPIO));
        assert!(is_usable_config_gpio(0));
        assert!(is_usable_config_gpio(4));
        assert!(is_usable_config_gpio(33));
        for pin in RMII_GPIOS {
            assert!(!is_usable_config_gpio(pin), "GPIO{}", pin);
        }
        for pin in (6..=11).chain(34..=39) {
            assert!(!is_usable_config_gpio(pin), "GPIO{}", pin);
        }
        assert!(!is_usable_config_gpio(-1));
        assert!(!is_usable_config_gpio(40));
    }

    #[test]
    fn test_env_parsing() {
        assert_eq!(env_u32(Some("9600")), Some(9600));
        assert_eq!(env_u32(Some("96x0")), None);
        assert_eq!(env_u32(Some("")), None);
        assert_eq!(env_u32(Some("99999999999")), None);
        assert_eq!(port_or(Some(70000), 3333), 3333);
        assert_eq!(nonzero_or(Some(0), 115_200), 115_200);
    }
}
