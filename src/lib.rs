//! This crate exposes the internal functionality of the sweepscan port
//! scanner.
//!
//! sweepscan enumerates open TCP services across large target sets from an
//! unprivileged host. It never crafts raw packets: every probe is an
//! ordinary nonblocking `connect`, observed through a readiness
//! multiplexer within a bounded per-probe deadline. A deterministic rate
//! governor caps bandwidth and packet rate, which makes total scan time
//! predictable from the probe count alone.
//!
//! ## Architecture Overview
//!
//! The scanning behaviour is managed by [`Scanner`](crate::scanner::Scanner),
//! a single-threaded event loop:
//!
//! 1. **Input processing**: target expressions and port lists are parsed
//!    and validated ([`address`], [`input`])
//! 2. **Port ordering**: the port list is arranged for the sweep
//!    ([`port_strategy`])
//! 3. **Admission**: probes are issued port-major, paced by the rate
//!    governor ([`rate`]) and filtered through the blocklist
//!    ([`blocklist`])
//! 4. **Completion**: the readiness multiplexer ([`poller`]) reports
//!    handshake results, which are classified and streamed as verdicts
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use sweepscan::address::Targets;
//! use sweepscan::blocklist::Blocklist;
//! use sweepscan::input::{Opts, PollType};
//! use sweepscan::scanner::{ScanOptions, Scanner};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut opts = Opts::default();
//!     opts.targets = vec!["192.168.0.0/24".to_owned()];
//!     let targets = Targets::parse(&opts)?;
//!
//!     let options = ScanOptions {
//!         rtt: Duration::from_millis(500),     // Per-probe deadline
//!         retries: 2,                          // Timeout retries
//!         max_sockets: 256,                    // In-flight cap
//!         bandwidth_bps: 250_000,              // Bandwidth cap
//!         packet_rate: 0,                      // Packet rate (unlimited)
//!         poll_type: PollType::Auto,           // Readiness backend
//!         show_closed: false,                  // Only report open ports
//!         accessible: false,                   // Coloured output
//!     };
//!
//!     let mut scanner = Scanner::new(options, targets, vec![22, 80, 443], Blocklist::default())?;
//!     let summary = scanner.run()?;
//!     println!("{} open ports", summary.open);
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod address;

pub mod blocklist;

pub mod error;

pub mod platform;

pub mod poller;

pub mod port_strategy;

pub mod rate;

pub mod scanner;
