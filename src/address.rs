//! Provides functions to parse input IP addresses, CIDRs or files.

use std::fs;
use std::net::Ipv4Addr;
use std::str::FromStr;

use cidr_utils::cidr::Ipv4Cidr;

use crate::error::ScanError;
use crate::input::Opts;

/// An inclusive range of IPv4 addresses, stored as host-order integers.
///
/// Target expressions are folded into these at parse time so that a scan
/// of millions of addresses costs two integers per expression, not a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRange {
    start: u32,
    end: u32,
}

impl HostRange {
    fn count(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }
}

/// The parsed host side of a scan: a list of [`HostRange`]s that can be
/// counted and swept repeatedly (once per port) without materialising
/// addresses.
#[derive(Debug, Clone, Default)]
pub struct Targets {
    ranges: Vec<HostRange>,
}

/// A resumable position inside [`Targets`]. Copy so the probe stream can
/// rewind to the start of the host sweep for each port.
#[derive(Debug, Clone, Copy)]
pub struct HostCursor {
    range: usize,
    addr: u64,
}

impl Targets {
    /// Parses the target expressions (or the target file) from `opts`.
    ///
    /// ```rust
    /// # use sweepscan::input::Opts;
    /// # use sweepscan::address::Targets;
    /// let mut opts = Opts::default();
    /// opts.targets = vec!["192.168.0.0/30".to_owned()];
    ///
    /// let targets = Targets::parse(&opts).unwrap();
    /// assert_eq!(targets.count(), 4);
    /// ```
    pub fn parse(opts: &Opts) -> Result<Self, ScanError> {
        let mut ranges = Vec::new();

        if let Some(file) = &opts.file {
            let content = fs::read_to_string(file).map_err(|e| {
                ScanError::Config(format!("Could not read target file {file:?}: {e}"))
            })?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                ranges.push(parse_expression(line)?);
            }
        } else {
            for expr in &opts.targets {
                ranges.push(parse_expression(expr)?);
            }
        }

        if ranges.is_empty() {
            return Err(ScanError::Config(String::from(
                "No targets to scan. Pass IPs, CIDRs or ranges, or a file with -f.",
            )));
        }

        Ok(Self { ranges })
    }

    /// Total number of addresses across all ranges. Known without
    /// iteration, which is what makes progress figures cheap.
    pub fn count(&self) -> u64 {
        self.ranges.iter().map(HostRange::count).sum()
    }

    /// A cursor positioned at the first address.
    pub fn cursor(&self) -> HostCursor {
        HostCursor {
            range: 0,
            addr: self.ranges.first().map_or(0, |r| u64::from(r.start)),
        }
    }

    /// Yields the address under the cursor and advances it, or `None`
    /// once the sweep is complete.
    pub fn advance(&self, cursor: &mut HostCursor) -> Option<Ipv4Addr> {
        let range = self.ranges.get(cursor.range)?;
        let addr = Ipv4Addr::from(cursor.addr as u32);
        if cursor.addr >= u64::from(range.end) {
            cursor.range += 1;
            cursor.addr = self
                .ranges
                .get(cursor.range)
                .map_or(0, |r| u64::from(r.start));
        } else {
            cursor.addr += 1;
        }
        Some(addr)
    }
}

/// Parses one target expression: a bare IPv4 address, an address range
/// `a.b.c.d-e.f.g.h`, or CIDR notation. Network and broadcast addresses of
/// a CIDR are included; use the blocklist to skip them where needed.
pub fn parse_expression(expr: &str) -> Result<HostRange, ScanError> {
    if let Ok(ip) = Ipv4Addr::from_str(expr) {
        let ip = u32::from(ip);
        return Ok(HostRange { start: ip, end: ip });
    }

    if let Some((start_str, end_str)) = expr.split_once('-') {
        let start = Ipv4Addr::from_str(start_str.trim())
            .map_err(|_| invalid_expression(expr))?;
        let end = Ipv4Addr::from_str(end_str.trim()).map_err(|_| invalid_expression(expr))?;
        if start > end {
            return Err(ScanError::Config(format!(
                "IP range {expr} runs backwards",
            )));
        }
        return Ok(HostRange {
            start: u32::from(start),
            end: u32::from(end),
        });
    }

    if expr.contains('/') {
        let cidr = cidr_utils::cidr::parsers::parse_cidr_ignore_hostbits::<Ipv4Cidr, _>(
            expr,
            Ipv4Addr::from_str,
        )
        .map_err(|_| invalid_expression(expr))?;
        if cidr.network_length() < 8 {
            return Err(ScanError::Config(format!(
                "Refusing CIDR {expr}: prefixes shorter than /8 are almost certainly a mistake",
            )));
        }
        return Ok(HostRange {
            start: u32::from(cidr.first_address()),
            end: u32::from(cidr.last_address()),
        });
    }

    Err(invalid_expression(expr))
}

fn invalid_expression(expr: &str) -> ScanError {
    ScanError::Config(format!(
        "{expr} is not a valid IPv4 address, IP range or CIDR",
    ))
}

#[cfg(test)]
mod tests {
    use super::{parse_expression, Targets};
    use crate::input::Opts;
    use std::net::Ipv4Addr;

    fn targets_from(exprs: &[&str]) -> Targets {
        let opts = Opts {
            targets: exprs.iter().map(|s| (*s).to_owned()).collect(),
            ..Opts::default()
        };
        Targets::parse(&opts).unwrap()
    }

    #[test]
    fn parse_correct_addresses() {
        let targets = targets_from(&["127.0.0.1", "192.168.0.0/30"]);
        let mut cursor = targets.cursor();
        let mut ips = Vec::new();
        while let Some(ip) = targets.advance(&mut cursor) {
            ips.push(ip);
        }

        assert_eq!(
            ips,
            [
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(192, 168, 0, 0),
                Ipv4Addr::new(192, 168, 0, 1),
                Ipv4Addr::new(192, 168, 0, 2),
                Ipv4Addr::new(192, 168, 0, 3)
            ]
        );
    }

    #[test]
    fn parse_address_range() {
        let targets = targets_from(&["10.0.0.250-10.0.1.2"]);
        assert_eq!(targets.count(), 9);

        let mut cursor = targets.cursor();
        assert_eq!(
            targets.advance(&mut cursor),
            Some(Ipv4Addr::new(10, 0, 0, 250))
        );
    }

    #[test]
    fn cidr_includes_network_and_broadcast() {
        let targets = targets_from(&["10.0.0.0/24"]);
        assert_eq!(targets.count(), 256);

        let mut cursor = targets.cursor();
        let first = targets.advance(&mut cursor).unwrap();
        let mut last = first;
        while let Some(ip) = targets.advance(&mut cursor) {
            last = ip;
        }
        assert_eq!(first, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(last, Ipv4Addr::new(10, 0, 0, 255));
    }

    #[test]
    fn cursor_is_restartable() {
        let targets = targets_from(&["10.0.0.1", "10.0.0.5-10.0.0.6"]);
        for _ in 0..3 {
            let mut cursor = targets.cursor();
            let mut seen = 0;
            while targets.advance(&mut cursor).is_some() {
                seen += 1;
            }
            assert_eq!(seen, 3);
        }
    }

    #[test]
    fn parse_incorrect_addresses() {
        assert!(parse_expression("im_wrong").is_err());
        assert!(parse_expression("300.10.1.1").is_err());
        assert!(parse_expression("10.0.0.5-10.0.0.1").is_err());
        assert!(parse_expression("10.0.0.0/36").is_err());
    }

    #[test]
    fn ipv6_is_rejected() {
        assert!(parse_expression("::1").is_err());
        assert!(parse_expression("2001:db8::/64").is_err());
    }

    #[test]
    fn refuses_giant_cidr() {
        let err = parse_expression("10.0.0.0/4").unwrap_err();
        assert!(err.to_string().contains("/8"));
    }

    #[test]
    fn parse_hosts_file_skips_comments() {
        let dir = std::env::temp_dir().join("sweepscan-address-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hosts.txt");
        std::fs::write(&path, "# lab hosts\n10.0.0.1\n\n10.0.1.0/30\n").unwrap();

        let opts = Opts {
            file: Some(path),
            ..Opts::default()
        };
        let targets = Targets::parse(&opts).unwrap();
        assert_eq!(targets.count(), 5);
    }

    #[test]
    fn empty_input_is_an_error() {
        let opts = Opts::default();
        assert!(Targets::parse(&opts).is_err());
    }
}
