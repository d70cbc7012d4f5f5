//! ESP-IDF implementations of the hardware seams

pub mod bridge;
pub mod eth;
pub mod events;
pub mod http;
pub mod nvs;

pub use bridge::TcpServerComponent;
pub use eth::{discover_ports, EspEthInterface, EspEthStack};
pub use events::{subscribe, EspMacReader, EventSubscriptions};
pub use http::{EspConfigServer, EspRestarter};
pub use nvs::NvsStorage;
