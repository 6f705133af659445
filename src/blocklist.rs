//! Holds the set of addresses a scan must never touch.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ScanError;

/// Explicit deny set of IPv4 addresses.
///
/// Blocklisted probes produce no socket and no verdict. The main use is
/// network and broadcast addresses: on some platforms a `connect` to one
/// of those fails in a way the process cannot recover from.
#[derive(Debug, Default)]
pub struct Blocklist {
    ips: HashSet<Ipv4Addr>,
}

impl Blocklist {
    /// Builds a blocklist from user-supplied strings. Every entry must be
    /// a single valid IPv4 address; anything else is a configuration error.
    pub fn parse(entries: &[String]) -> Result<Self, ScanError> {
        let mut ips = HashSet::with_capacity(entries.len());
        for entry in entries {
            let ip = Ipv4Addr::from_str(entry.trim()).map_err(|_| {
                ScanError::Config(format!("Invalid IP address in blocklist: {entry}"))
            })?;
            ips.insert(ip);
        }
        Ok(Self { ips })
    }

    pub fn is_blocked(&self, ip: Ipv4Addr) -> bool {
        self.ips.contains(&ip)
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Blocklist;

    #[test]
    fn blocks_listed_addresses_only() {
        let blocklist =
            Blocklist::parse(&["10.0.0.0".to_owned(), "10.0.0.255".to_owned()]).unwrap();

        assert!(blocklist.is_blocked("10.0.0.0".parse().unwrap()));
        assert!(blocklist.is_blocked("10.0.0.255".parse().unwrap()));
        assert!(!blocklist.is_blocked("10.0.0.1".parse().unwrap()));
        assert_eq!(blocklist.len(), 2);
    }

    #[test]
    fn rejects_invalid_entries() {
        let err = Blocklist::parse(&["10.0.0.0/24".to_owned()]).unwrap_err();
        assert!(err.to_string().contains("Invalid IP address in blocklist"));
    }

    #[test]
    fn empty_blocklist_blocks_nothing() {
        let blocklist = Blocklist::default();
        assert!(blocklist.is_empty());
        assert!(!blocklist.is_blocked("127.0.0.1".parse().unwrap()));
    }
}
