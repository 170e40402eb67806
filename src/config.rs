use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const DEFAULT_PORT: u16 = 50222;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
const MAX_BUFFER_SIZE: usize = 65535;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: Ipv4Addr,
    pub port: u16,
    pub buffer_size: usize,
    /// Shape errors (missing `type`, short `obs` row) stop the listener instead of being skipped.
    pub strict: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            strict: false,
        }
    }
}

impl ListenerConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ListenerConfig::default();

        if let Some(addr) = lookup("TEMPEST_BIND_ADDR") {
            config.bind_addr = addr
                .trim()
                .parse()
                .map_err(|e| format!("Invalid TEMPEST_BIND_ADDR '{}': {}", addr, e))?;
        }

        if let Some(port) = lookup("TEMPEST_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| format!("Invalid TEMPEST_PORT '{}': {}", port, e))?;
        }

        if let Some(size) = lookup("TEMPEST_BUFFER_SIZE") {
            let size: usize = size
                .trim()
                .parse()
                .map_err(|e| format!("Invalid TEMPEST_BUFFER_SIZE '{}': {}", size, e))?;
            if size == 0 || size > MAX_BUFFER_SIZE {
                return Err(format!(
                    "TEMPEST_BUFFER_SIZE must be between 1 and {}, got {}",
                    MAX_BUFFER_SIZE, size
                )
                .into());
            }
            config.buffer_size = size;
        }

        if let Some(strict) = lookup("TEMPEST_STRICT") {
            config.strict = match strict.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => return Err(format!("Invalid TEMPEST_STRICT '{}'", other).into()),
            };
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_addr, self.port))
    }
}
