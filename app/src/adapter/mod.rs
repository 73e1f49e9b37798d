pub mod homeassistant;
pub mod http_api;
pub mod kraken;
