//! Receives classified probes and streams verdict lines.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use colored::Colorize;

/// Final state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Open => write!(f, "open"),
            Verdict::Closed => write!(f, "closed"),
            Verdict::Filtered => write!(f, "filtered"),
        }
    }
}

/// Streams verdicts to stdout and keeps the scan totals.
///
/// One line per endpoint: `<ip> <port> <verdict>`. Open ports always
/// print; closed and filtered only when the user asked for them. The
/// engine guarantees one verdict per endpoint, so the dedup set here is
/// defensive: it holds only endpoints whose in-flight record has not been
/// retired yet and stays bounded by the live probe count.
#[derive(Debug, Default)]
pub struct VerdictSink {
    show_closed: bool,
    accessible: bool,
    live: HashSet<(Ipv4Addr, u16)>,
    open: u64,
    closed: u64,
    filtered: u64,
}

impl VerdictSink {
    pub fn new(show_closed: bool, accessible: bool) -> Self {
        Self {
            show_closed,
            accessible,
            ..Self::default()
        }
    }

    /// Accepts a verdict, counting it and printing the line unless policy
    /// suppresses it. A duplicate for an unretired endpoint is dropped.
    pub fn report(&mut self, ip: Ipv4Addr, port: u16, verdict: Verdict) {
        if !self.live.insert((ip, port)) {
            log::debug!("suppressed duplicate verdict for {ip}:{port}");
            return;
        }

        match verdict {
            Verdict::Open => self.open += 1,
            Verdict::Closed => self.closed += 1,
            Verdict::Filtered => self.filtered += 1,
        }

        if verdict != Verdict::Open && !self.show_closed {
            return;
        }

        if self.accessible {
            println!("{ip} {port} {verdict}");
        } else {
            let word = match verdict {
                Verdict::Open => verdict.to_string().purple(),
                Verdict::Closed => verdict.to_string().red(),
                Verdict::Filtered => verdict.to_string().yellow(),
            };
            println!("{ip} {port} {word}");
        }
    }

    /// Marks the endpoint's record as gone, releasing its dedup entry.
    pub fn retire(&mut self, ip: Ipv4Addr, port: u16) {
        self.live.remove(&(ip, port));
    }

    pub fn open_count(&self) -> u64 {
        self.open
    }

    pub fn closed_count(&self) -> u64 {
        self.closed
    }

    pub fn filtered_count(&self) -> u64 {
        self.filtered
    }
}
