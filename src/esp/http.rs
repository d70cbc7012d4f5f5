//! EspHttpServer wiring for the configuration pages

use embedded_svc::http::{Headers, Method};
use embedded_svc::io::Write;
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpServer};
use esp_idf_svc::io::EspIOError;
use esp_idf_svc::sys::{ESP_ERR_TIMEOUT, HTTPD_SOCK_ERR_TIMEOUT};
use log::info;

use super::nvs::NvsStorage;
use crate::config::SettingsStore;
use crate::web::{
    handle_save, read_form_body, render_config_page, restart_after, BodyError, Restarter,
    ServerLauncher, RESTART_DELAY, WEB_PORT,
};

impl From<EspIOError> for BodyError {
    fn from(e: EspIOError) -> Self {
        let code = e.0.code();
        if code == ESP_ERR_TIMEOUT as i32 || code == HTTPD_SOCK_ERR_TIMEOUT as i32 {
            BodyError::Timeout
        } else {
            BodyError::Io(e.to_string())
        }
    }
}

#[derive(Clone)]
pub struct EspRestarter;

impl Restarter for EspRestarter {
    fn restart(&self) {
        // SAFETY: esp_restart() performs a software reset and never returns.
        unsafe { esp_idf_svc::sys::esp_restart() }
    }
}

/// Launches the HTTP server with `GET /` and `POST /save`
pub struct EspConfigServer {
    store: SettingsStore<NvsStorage>,
}

impl EspConfigServer {
    pub fn new(store: SettingsStore<NvsStorage>) -> Self {
        Self { store }
    }
}

impl ServerLauncher for EspConfigServer {
    type Server = EspHttpServer<'static>;

    fn launch(&mut self) -> anyhow::Result<EspHttpServer<'static>> {
        let http_config = HttpConfig {
            http_port: WEB_PORT,
            stack_size: 6144,
            max_uri_handlers: 8,
            ..Default::default()
        };

        let mut server = EspHttpServer::new(&http_config)?;

        let store_page = self.store.clone();
        let store_save = self.store.clone();

        server.fn_handler("/", Method::Get, move |req| {
            let html = render_config_page(&store_page.load());
            let mut resp = req.into_response(200, Some("OK"), &[("Content-Type", "text/html")])?;
            resp.write_all(html.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        server.fn_handler("/save", Method::Post, move |mut req| {
            let content_len = req.content_len().unwrap_or(0) as usize;
            let body = read_form_body(&mut req, content_len);
            let outcome = handle_save(&store_save, body);

            let mut resp = req.into_response(outcome.status(), None, &[("Content-Type", "text/plain")])?;
            resp.write_all(outcome.message().as_bytes())?;
            resp.flush()?;

            if outcome.restart_required() {
                info!("Restart scheduled in {:?}", RESTART_DELAY);
                restart_after(EspRestarter, RESTART_DELAY);
            }
            Ok::<(), anyhow::Error>(())
        })?;

        info!("Web server started");
        Ok(server)
    }
}
