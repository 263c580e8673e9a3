//! IPv4 CIDR parsing and subnet carving.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::ConfigError;

/// An IPv4 network in CIDR notation, with no host bits set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr(Ipv4Net);

impl Ipv4Cidr {
    /// Build a block from an address and prefix length.
    ///
    /// Host bits must be zero, so `10.0.0.1/16` is rejected while
    /// `10.0.0.1/32` is accepted.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, ConfigError> {
        let net = Ipv4Net::new(addr, prefix)
            .map_err(|_| ConfigError::InvalidCidr(format!("{addr}/{prefix}")))?;
        if net.trunc() != net {
            return Err(ConfigError::InvalidCidr(net.to_string()));
        }
        Ok(Self(net))
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    /// Consecutive subnets of the given prefix length, lowest address first.
    ///
    /// Yields nothing when `prefix` is shorter than the block's own prefix.
    pub fn subnets(&self, prefix: u8) -> impl Iterator<Item = Ipv4Cidr> {
        self.0.subnets(prefix).into_iter().flatten().map(Ipv4Cidr)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidCidr(s.to_string()))?;
        Self::new(net.addr(), net.prefix_len()).map_err(|_| ConfigError::InvalidCidr(s.to_string()))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr: Ipv4Cidr = " 10.0.0.0/16".parse().unwrap();
        assert_eq!(cidr.prefix(), 16);
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_rejects_host_bits_and_garbage() {
        assert!("10.0.0.1/16".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("300.0.0.0/8".parse::<Ipv4Cidr>().is_err());
        assert!("1.2.3.4/32".parse::<Ipv4Cidr>().is_ok());
        assert!(Ipv4Cidr::new(Ipv4Addr::new(10, 0, 0, 1), 24).is_err());
    }

    #[test]
    fn test_subnets_are_consecutive() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let subnets: Vec<String> = cidr.subnets(24).take(3).map(|c| c.to_string()).collect();
        assert_eq!(subnets, vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
        assert_eq!(cidr.subnets(24).count(), 256);
        assert_eq!(cidr.subnets(8).count(), 0);
        assert_eq!(cidr.subnets(33).count(), 0);
    }
}
