//! Configuration web server
//!
//! Two endpoints, reachable only after the config button was pressed:
//! - `GET /` renders the current settings as an editable form
//! - `POST /save` validates the submitted form, persists it and restarts the device
//!
//! This module holds the request/response logic; the ESP-IDF HTTP server wiring
//! lives in `esp::http` and only forwards to it.

use embedded_svc::io::{ErrorKind, Read};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{addr_string, nvs_keys, AddrString, SaveReport, Settings, SettingsStore, StoreError};
use crate::config_mode::ConfigServerControl;
use crate::storage::StorageBackend;

/// Web server port
pub const WEB_PORT: u16 = 80;

/// Largest form body read from a `/save` request
pub const MAX_FORM_BODY: usize = 511;

/// Time between the save confirmation and the restart
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

pub const SAVE_CONFIRMATION: &str = "Settings saved. Rebooting...";

const CSS_STYLES: &str = "body{font-family:system-ui,-apple-system,Segoe UI,Roboto;background:#f7f7f8;color:#222;margin:0}\
.container{max-width:720px;margin:32px auto;padding:24px;background:#fff;border-radius:12px;box-shadow:0 4px 16px rgba(0,0,0,.08)}\
h1{margin:0 0 12px;font-size:20px}\
fieldset{border:1px solid #e6e6e9;border-radius:8px;margin:16px 0;padding:16px}\
legend{padding:0 8px;color:#333;font-weight:600}\
label{display:block;margin:10px 0 6px;color:#555;font-size:14px}\
input[type=text],input[type=number]{width:100%;padding:10px;border:1px solid #ccc;border-radius:6px;font-size:14px;box-sizing:border-box}\
.row{display:grid;grid-template-columns:1fr 1fr;gap:12px}\
.actions{margin-top:16px}\
button{background:#0078d4;color:#fff;border:0;border-radius:8px;padding:10px 14px;font-weight:600;cursor:pointer}\
button:active{transform:translateY(1px)}";

/// Toggles the static-address inputs with the checkbox
const TOGGLE_SCRIPT: &str = "function tg(cb){document.querySelectorAll('.static-field').forEach(function(el){el.disabled=!cb.checked;});}";

/// Escape a stored value for use inside a double-quoted attribute
fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Generate the configuration page for `settings`
pub fn render_config_page(settings: &Settings) -> String {
    // Client-side only: the server accepts static fields either way.
    let disabled = if settings.use_static_ip { "" } else { "disabled" };
    let static_input = |label: &str, name: &str, value: &AddrString, placeholder: &str| {
        format!(
            r#"<div><label>{}</label><input class="static-field" {} type="text" name="{}" value="{}" maxlength="15" placeholder="{}"></div>"#,
            label,
            disabled,
            name,
            html_escape(value),
            placeholder
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Ethernet Bridge Config</title>
    <style>{}</style>
    <script>{}</script>
</head>
<body>
    <div class="container">
        <h1>Ethernet Bridge Configuration</h1>
        <form action="/save" method="post">
            <fieldset>
                <legend>Serial &amp; TCP</legend>
                <label>UART Baud Rate</label>
                <input type="number" name="{}" value="{}" min="1200" step="1">
                <label>TCP Port</label>
                <input type="number" name="{}" value="{}" min="1" max="65535">
            </fieldset>
            <fieldset>
                <legend>Network (Ethernet)</legend>
                <label><input type="checkbox" name="{}" {} onclick="tg(this)"> Use static IP (disable DHCP)</label>
                <div class="row">
                    {}
                    {}
                </div>
                <div class="row">
                    {}
                    {}
                </div>
                {}
                <div class="actions"><button type="submit">Save and Reboot</button></div>
            </fieldset>
        </form>
    </div>
</body>
</html>"#,
        CSS_STYLES,
        TOGGLE_SCRIPT,
        nvs_keys::BAUD_RATE,
        settings.serial_baud_rate,
        nvs_keys::TCP_PORT,
        settings.tcp_port,
        nvs_keys::USE_STATIC_IP,
        if settings.use_static_ip { "checked" } else { "" },
        static_input("IP Address", nvs_keys::IP_ADDR, &settings.ip_address, "192.168.1.100"),
        static_input("Netmask", nvs_keys::NETMASK, &settings.netmask, "255.255.255.0"),
        static_input("Gateway", nvs_keys::GATEWAY, &settings.gateway, "192.168.1.1"),
        static_input("DNS 1", nvs_keys::DNS1, &settings.dns_primary, "8.8.8.8"),
        static_input("DNS 2", nvs_keys::DNS2, &settings.dns_secondary, "1.1.1.1"),
    )
}

/// Why a submitted form was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    MissingField(&'static str),
    NotANumber { field: &'static str, value: String },
    OutOfRange { field: &'static str, value: i64 },
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::MissingField(field) => write!(f, "missing field {}", field),
            FormError::NotANumber { field, value } => write!(f, "{} is not a number: '{}'", field, value),
            FormError::OutOfRange { field, value } => write!(f, "{} out of range: {}", field, value),
        }
    }
}

impl std::error::Error for FormError {}

/// Why a request body could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    Timeout,
    /// No body arrived before the connection ended
    Closed,
    Io(String),
}

impl std::fmt::Display for BodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyError::Timeout => write!(f, "timed out reading request body"),
            BodyError::Closed => write!(f, "empty request body"),
            BodyError::Io(e) => write!(f, "error reading request body: {}", e),
        }
    }
}

impl std::error::Error for BodyError {}

impl From<ErrorKind> for BodyError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::TimedOut => BodyError::Timeout,
            other => BodyError::Io(format!("{:?}", other)),
        }
    }
}

/// Read up to [`MAX_FORM_BODY`] bytes of a request body; the rest is ignored
pub fn read_form_body<R>(reader: &mut R, content_len: usize) -> Result<String, BodyError>
where
    R: Read,
    BodyError: From<R::Error>,
{
    let wanted = content_len.min(MAX_FORM_BODY);
    let mut buf = [0u8; MAX_FORM_BODY];
    let mut filled = 0;

    while filled < wanted {
        match reader.read(&mut buf[filled..wanted]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == 0 {
        return Err(BodyError::Closed);
    }
    if content_len > MAX_FORM_BODY {
        warn!("Form body of {} bytes truncated to {}", content_len, MAX_FORM_BODY);
    }
    Ok(String::from_utf8_lossy(&buf[..filled]).into_owned())
}

/// Decode one `application/x-www-form-urlencoded` component
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(value) => value.into_owned(),
        Err(_) => spaced.clone(),
    }
}

fn form_pairs(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            (decode_component(key), decode_component(value))
        })
        .collect()
}

/// First value submitted for `key`
fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn required_number(pairs: &[(String, String)], field: &'static str) -> Result<i64, FormError> {
    let raw = form_value(pairs, field).ok_or(FormError::MissingField(field))?;
    raw.trim().parse::<i64>().map_err(|_| FormError::NotANumber {
        field,
        value: raw.to_string(),
    })
}

/// Parse and validate a `/save` submission
pub fn parse_save_form(body: &str) -> Result<Settings, FormError> {
    let pairs = form_pairs(body);

    let baud_rate = required_number(&pairs, nvs_keys::BAUD_RATE)?;
    let tcp_port = required_number(&pairs, nvs_keys::TCP_PORT)?;

    let serial_baud_rate = u32::try_from(baud_rate)
        .ok()
        .filter(|&b| b > 0 && b <= i32::MAX as u32)
        .ok_or(FormError::OutOfRange {
            field: nvs_keys::BAUD_RATE,
            value: baud_rate,
        })?;
    let tcp_port = u16::try_from(tcp_port)
        .ok()
        .filter(|&p| p > 0)
        .ok_or(FormError::OutOfRange {
            field: nvs_keys::TCP_PORT,
            value: tcp_port,
        })?;

    let optional_addr = |key: &str| form_value(&pairs, key).map(|v| addr_string(v.trim())).unwrap_or_default();

    Ok(Settings {
        serial_baud_rate,
        tcp_port,
        use_static_ip: form_value(&pairs, nvs_keys::USE_STATIC_IP).is_some(),
        ip_address: optional_addr(nvs_keys::IP_ADDR),
        netmask: optional_addr(nvs_keys::NETMASK),
        gateway: optional_addr(nvs_keys::GATEWAY),
        dns_primary: optional_addr(nvs_keys::DNS1),
        dns_secondary: optional_addr(nvs_keys::DNS2),
    })
}

/// Result of a `/save` request
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(SaveReport),
    Rejected(FormError),
    StoreFailed(StoreError),
    BodyFailed(BodyError),
}

impl SaveOutcome {
    pub fn status(&self) -> u16 {
        match self {
            SaveOutcome::Saved(_) => 200,
            SaveOutcome::BodyFailed(BodyError::Timeout) => 408,
            _ => 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            SaveOutcome::Saved(_) => SAVE_CONFIRMATION.to_string(),
            SaveOutcome::Rejected(e @ FormError::OutOfRange { .. }) => format!("Invalid settings: {}", e),
            SaveOutcome::Rejected(e) => format!("Failed to parse settings: {}", e),
            SaveOutcome::StoreFailed(e) => format!("Failed to save settings: {}", e),
            SaveOutcome::BodyFailed(BodyError::Timeout) => "Request timed out".to_string(),
            SaveOutcome::BodyFailed(e) => format!("Failed to read settings: {}", e),
        }
    }

    /// Only a persisted submission restarts the device
    pub fn restart_required(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }
}

/// Handle a `/save` body; the store is only touched for a valid form
pub fn handle_save<B: StorageBackend>(
    store: &SettingsStore<B>,
    body: Result<String, BodyError>,
) -> SaveOutcome {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!("Settings submission failed: {}", e);
            return SaveOutcome::BodyFailed(e);
        }
    };

    let settings = match parse_save_form(&body) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Rejected settings submission: {}", e);
            return SaveOutcome::Rejected(e);
        }
    };

    match store.save(&settings) {
        Ok(report) => {
            info!("Settings saved via web portal");
            SaveOutcome::Saved(report)
        }
        Err(e) => SaveOutcome::StoreFailed(e),
    }
}

/// Performs the device restart
pub trait Restarter: Send + 'static {
    fn restart(&self);
}

/// Restart after `delay` on a separate thread so the response can flush first
pub fn schedule_restart<R: Restarter>(restarter: R, delay: Duration) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("restart".into())
        .stack_size(3072)
        .spawn(move || {
            thread::sleep(delay);
            info!("Restarting...");
            restarter.restart();
        })
}

/// Restart after `delay`, preferably from a separate thread. If that thread cannot be
/// spawned the caller sleeps for `delay` and restarts inline.
pub fn restart_after<R: Restarter + Clone>(restarter: R, delay: Duration) {
    let scheduled = schedule_restart(restarter.clone(), delay);
    restart_inline_on_failure(scheduled, &restarter, delay);
}

fn restart_inline_on_failure<R: Restarter>(
    scheduled: std::io::Result<JoinHandle<()>>,
    restarter: &R,
    delay: Duration,
) {
    if let Err(e) = scheduled {
        error!("Could not spawn restart thread ({}), restarting inline", e);
        thread::sleep(delay);
        restarter.restart();
    }
}

/// Creates the underlying HTTP server with both handlers registered
pub trait ServerLauncher {
    /// Dropping it stops the server
    type Server;

    fn launch(&mut self) -> anyhow::Result<Self::Server>;
}

/// Start/stop guard around the HTTP server
pub struct ConfigWebServer<L: ServerLauncher> {
    launcher: L,
    running: Option<L::Server>,
}

impl<L: ServerLauncher> ConfigWebServer<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stop serving; no-op if not running
    pub fn stop(&mut self) {
        if self.running.take().is_some() {
            info!("Configuration web server stopped");
        }
    }
}

impl<L: ServerLauncher> ConfigServerControl for ConfigWebServer<L> {
    fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        info!("Starting web server on port {}", WEB_PORT);
        self.running = Some(self.launcher.launch()?);
        Ok(())
    }
}
