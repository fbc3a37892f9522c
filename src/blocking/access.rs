//! Whitelist matching.

use ipnet::IpNet;
use std::net::IpAddr;

use crate::config::schema::BlockingConfig;
use crate::config::validation::parse_network;

/// Addresses that are never escalated or blocked.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    networks: Vec<IpNet>,
    loopback: bool,
}

impl AccessList {
    pub fn new(networks: Vec<IpNet>, loopback: bool) -> Self {
        Self { networks, loopback }
    }

    /// Build from configuration. Entries were validated at load time.
    pub fn from_config(config: &BlockingConfig) -> Self {
        let networks = config
            .whitelist
            .iter()
            .filter_map(|entry| parse_network(entry))
            .collect();
        Self::new(networks, config.whitelist_loopback)
    }

    /// Whether `ip` is whitelisted. IPv4-mapped IPv6 addresses match their IPv4 form.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if self.loopback && ip.is_loopback() {
            return true;
        }
        self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && !self.loopback
    }
}
