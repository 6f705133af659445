//! Core functionality for actual scanning behaviour.
//!
//! The engine is a single-threaded readiness loop. Each iteration admits
//! probes while the rate governor and socket pool allow, waits on the
//! multiplexer no longer than the next admission slot or the earliest
//! probe deadline, classifies whatever completed, and retires or retries
//! the rest. Nothing here blocks on I/O: connects are nonblocking and the
//! only suspension points are the bounded wait and the governor's pacing
//! sleeps (realised as waits with no descriptors registered).

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use log::{debug, warn};
use socket2::Socket;

mod probe_stream;
mod sink;

pub use probe_stream::{Probe, ProbeStream};
pub use sink::{Verdict, VerdictSink};

use crate::address::Targets;
use crate::blocklist::Blocklist;
use crate::error::ScanError;
use crate::input::PollType;
use crate::platform::{self, ConnectStart, SocketErrorKind};
use crate::poller::{Poller, Readiness};
use crate::rate::RateGovernor;

/// Configuration record the engine consumes. The CLI collaborator builds
/// one; tests build their own.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Per-probe deadline.
    pub rtt: Duration,
    /// Timeout retries per endpoint. Total attempts are `retries + 1`.
    pub retries: u8,
    /// Cap on simultaneously open sockets.
    pub max_sockets: usize,
    /// Bandwidth cap in bits per second.
    pub bandwidth_bps: u64,
    /// Packet rate cap, 0 for unlimited.
    pub packet_rate: u64,
    /// Readiness backend selection.
    pub poll_type: PollType,
    /// Report closed and filtered verdicts, not just open.
    pub show_closed: bool,
    /// Plain output for screen readers.
    pub accessible: bool,
}

/// What a scan did, for the closing statistics line.
#[derive(Debug, Clone, Copy)]
pub struct ScanSummary {
    pub open: u64,
    pub closed: u64,
    pub filtered: u64,
    pub probes_sent: u64,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// How one connect attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Connected,
    Refused,
    Unreachable,
    TimedOut,
}

struct InFlight {
    probe: Probe,
    socket: Socket,
    issued: Instant,
    deadline: Instant,
}

/// The probe engine. Owns every socket, the rate counters, the target
/// stream and the sink; the multiplexer only borrows descriptors.
pub struct Scanner {
    options: ScanOptions,
    stream: ProbeStream,
    governor: RateGovernor,
    blocklist: Blocklist,
    sink: VerdictSink,
    poller: Poller,
    max_sockets: usize,
    low_water: usize,
    in_flight: HashMap<RawFd, InFlight>,
    warned_unreachable: HashSet<Ipv4Addr>,
}

impl Scanner {
    pub fn new(
        options: ScanOptions,
        targets: Targets,
        ports: Vec<u16>,
        blocklist: Blocklist,
    ) -> Result<Self, ScanError> {
        let poller = Poller::new(options.poll_type)?;
        let governor = RateGovernor::new(
            options.bandwidth_bps,
            options.packet_rate,
            platform::PACKET_OVERHEAD_BYTES,
        );
        let sink = VerdictSink::new(options.show_closed, options.accessible);
        let max_sockets = options.max_sockets;

        Ok(Self {
            options,
            stream: ProbeStream::new(targets, ports),
            governor,
            blocklist,
            sink,
            poller,
            max_sockets,
            low_water: max_sockets * 9 / 10,
            in_flight: HashMap::new(),
            warned_unreachable: HashSet::new(),
        })
    }

    /// Which readiness backend ended up active.
    pub fn backend_name(&self) -> &'static str {
        self.poller.backend_name()
    }

    /// First-attempt probes this scan will issue, for progress figures.
    pub fn total_probes(&self) -> u64 {
        self.stream.total_forward()
    }

    /// Runs the scan to completion: target stream exhausted, retry queue
    /// empty and no socket left in flight.
    pub fn run(&mut self) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let mut events: Vec<(RawFd, Readiness)> = Vec::new();

        debug!(
            "sweep start: {} forward probes, {} max sockets, {} backend",
            self.stream.total_forward(),
            self.max_sockets,
            self.poller.backend_name()
        );

        loop {
            self.admit()?;

            if self.in_flight.is_empty() && !self.stream.pending() {
                break;
            }

            let now = Instant::now();
            let budget = self.wait_budget(now);
            self.poller.wait(budget, &mut events)?;

            for (fd, readiness) in events.drain(..) {
                self.complete(fd, readiness);
            }

            self.expire_deadlines();
        }

        Ok(ScanSummary {
            open: self.sink.open_count(),
            closed: self.sink.closed_count(),
            filtered: self.sink.filtered_count(),
            probes_sent: self.governor.probes_sent(),
            bytes_sent: self.governor.bytes_sent(),
            elapsed: started.elapsed(),
        })
    }

    /// Issues probes until the pool is full, the stream runs dry or the
    /// governor pushes the next slot into the future. Rate delays break
    /// out rather than sleep here: a deadline may expire before the slot
    /// arrives, and I/O must be serviced first.
    fn admit(&mut self) -> Result<(), ScanError> {
        while self.in_flight.len() < self.max_sockets {
            let now = Instant::now();
            if self.governor.admit_at(now) > now {
                break;
            }

            let drain_retries = self.in_flight.len() < self.low_water;
            let Some(probe) = self.stream.next(drain_retries) else {
                break;
            };

            if self.blocklist.is_blocked(probe.ip) {
                debug!("skipping {}:{}: blocklisted", probe.ip, probe.port);
                continue;
            }

            let addr = SocketAddrV4::new(probe.ip, probe.port);
            match platform::connect_nonblocking(addr) {
                Ok(ConnectStart::Pending(socket)) => {
                    let fd = socket.as_raw_fd();
                    self.poller.register(fd)?;
                    self.in_flight.insert(
                        fd,
                        InFlight {
                            probe,
                            socket,
                            issued: now,
                            deadline: now + self.options.rtt,
                        },
                    );
                    self.governor.record_issue(now);
                }
                Ok(ConnectStart::Connected) => {
                    // Fast handshake: no in-flight slot, but the SYN still
                    // pays the rate cost.
                    self.governor.record_issue(now);
                    self.finish(probe, ProbeOutcome::Connected);
                }
                Ok(ConnectStart::Refused) => {
                    self.governor.record_issue(now);
                    self.finish(probe, ProbeOutcome::Refused);
                }
                Ok(ConnectStart::Unreachable) => {
                    self.governor.record_issue(now);
                    self.warn_unreachable(probe.ip);
                    self.finish(probe, ProbeOutcome::Unreachable);
                }
                Ok(ConnectStart::OutOfDescriptors) => {
                    self.shrink_pool();
                    // The probe never hit the wire; requeue without
                    // touching its attempt budget.
                    self.stream.push_retry(probe);
                    if self.in_flight.is_empty() {
                        // Every descriptor is held outside the pool, so
                        // nothing of ours will free one; give the process
                        // a beat instead of spinning on connect.
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    break;
                }
                Err(source) => return Err(ScanError::Fatal { addr, source }),
            }
        }
        Ok(())
    }

    /// How long the multiplexer may sleep: no longer than the next
    /// admission slot (when admission is possible) and no longer than the
    /// earliest in-flight deadline.
    fn wait_budget(&self, now: Instant) -> Duration {
        let mut budget: Option<Duration> = None;

        if self.stream.pending() && self.in_flight.len() < self.max_sockets {
            let until_slot = self.governor.admit_at(now).saturating_duration_since(now);
            budget = Some(until_slot);
        }

        if let Some(deadline) = self.in_flight.values().map(|r| r.deadline).min() {
            let until_deadline = deadline.saturating_duration_since(now);
            budget = Some(budget.map_or(until_deadline, |b| b.min(until_deadline)));
        }

        // Both sources absent cannot happen while the loop is live; the
        // fallback just bounds the damage if that invariant ever breaks.
        budget.unwrap_or(Duration::from_millis(100))
    }

    /// Resolves one readiness event. The pending socket error is the
    /// authoritative signal; flags only decide when no error is pending.
    fn complete(&mut self, fd: RawFd, readiness: Readiness) {
        let Some(record) = self.in_flight.remove(&fd) else {
            // Already retired earlier in this batch.
            return;
        };
        if let Err(e) = self.poller.unregister(fd) {
            debug!("unregister of fd {fd} failed: {e}");
        }

        let outcome = classify(&record.socket, readiness);
        debug!(
            "{}:{} attempt {} resolved {:?} after {:?}",
            record.probe.ip,
            record.probe.port,
            record.probe.attempt,
            outcome,
            record.issued.elapsed()
        );
        self.finish(record.probe, outcome);
        // record.socket drops here, closing the descriptor.
    }

    /// Times out every in-flight record whose deadline has passed.
    fn expire_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<RawFd> = self
            .in_flight
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(fd, _)| *fd)
            .collect();

        for fd in expired {
            let Some(record) = self.in_flight.remove(&fd) else {
                continue;
            };
            if let Err(e) = self.poller.unregister(fd) {
                debug!("unregister of fd {fd} failed: {e}");
            }
            debug!(
                "{}:{} attempt {} timed out",
                record.probe.ip, record.probe.port, record.probe.attempt
            );
            self.finish(record.probe, ProbeOutcome::TimedOut);
        }
    }

    /// Terminal classification and retry policy. Only timeouts consume
    /// retries; refusal and unreachability already answer the question.
    fn finish(&mut self, probe: Probe, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Connected => self.emit(probe, Verdict::Open),
            ProbeOutcome::Refused => {
                let verdict = if platform::CAN_DETECT_REFUSED {
                    Verdict::Closed
                } else {
                    Verdict::Filtered
                };
                self.emit(probe, verdict);
            }
            ProbeOutcome::Unreachable => self.emit(probe, Verdict::Filtered),
            ProbeOutcome::TimedOut => {
                if probe.attempt < self.options.retries {
                    self.stream.push_retry(Probe {
                        attempt: probe.attempt + 1,
                        ..probe
                    });
                } else {
                    self.emit(probe, Verdict::Filtered);
                }
            }
        }
    }

    fn emit(&mut self, probe: Probe, verdict: Verdict) {
        self.sink.report(probe.ip, probe.port, verdict);
        self.sink.retire(probe.ip, probe.port);
    }

    /// Descriptor exhaustion mid-scan lowers the cap to what is already
    /// open and carries on; a scan is never aborted for this.
    fn shrink_pool(&mut self) {
        let shrunk = self.in_flight.len().max(1);
        warn!(
            "open-files limit hit; lowering max sockets {} -> {}",
            self.max_sockets, shrunk
        );
        self.max_sockets = shrunk;
        self.low_water = shrunk * 9 / 10;
    }

    fn warn_unreachable(&mut self, ip: Ipv4Addr) {
        if self.warned_unreachable.insert(ip) {
            warn!(
                "{ip} is unreachable (probably a network or broadcast address); reporting filtered"
            );
        }
    }
}

fn classify(socket: &Socket, readiness: Readiness) -> ProbeOutcome {
    match platform::pending_error(socket) {
        Ok(Some(err)) => match platform::classify_socket_error(&err) {
            SocketErrorKind::Refused => ProbeOutcome::Refused,
            SocketErrorKind::Unreachable => ProbeOutcome::Unreachable,
            SocketErrorKind::Other => {
                debug!("socket error treated as timeout: {err}");
                ProbeOutcome::TimedOut
            }
        },
        Ok(None) if readiness.writable && !readiness.hup => ProbeOutcome::Connected,
        Ok(None) if readiness.hup => ProbeOutcome::Refused,
        Ok(None) => ProbeOutcome::TimedOut,
        Err(err) => {
            debug!("could not read socket error: {err}");
            ProbeOutcome::TimedOut
        }
    }
}

/// Sizes the socket pool. The pool only needs to hold the probes issued
/// within one RTT, padded 1.5x so classification never starves admission;
/// more than that leaves sockets open long enough for the kernel to send
/// its own retries.
pub fn resolve_max_sockets(requested: Option<u64>, rtt: Duration, packet_gap: Duration) -> usize {
    let suggestion = ((1.5 * rtt.as_secs_f64() / packet_gap.as_secs_f64()).ceil() as usize).max(1);
    let os_cap = platform::soft_descriptor_limit()
        .map(|soft| soft.saturating_sub(platform::RESERVED_DESCRIPTORS) as usize)
        .unwrap_or(usize::MAX)
        .max(1);

    match requested {
        Some(n) => {
            let n = (n as usize).max(1);
            if n > os_cap {
                warn!(
                    "max sockets {n} exceeds the open-files limit; lowering to {os_cap}. \
                     Raise the limit with --ulimit or `ulimit -n`"
                );
                return os_cap;
            }
            if n as f64 > suggestion as f64 * 1.1 {
                warn!(
                    "max sockets {n} is above the suggested {suggestion} for these rates; \
                     sockets may idle past their deadline"
                );
            } else if (n as f64) < suggestion as f64 * 0.7 {
                warn!(
                    "max sockets {n} is below the suggested {suggestion} for these rates; \
                     the scan may run slow"
                );
            }
            n
        }
        None => suggestion
            .min(os_cap)
            .min(platform::MAX_SOCKETS_CEILING),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_max_sockets, ScanOptions, Scanner};
    use crate::address::Targets;
    use crate::blocklist::Blocklist;
    use crate::input::{Opts, PollType};
    use std::net::TcpListener;
    use std::time::Duration;

    fn options() -> ScanOptions {
        ScanOptions {
            rtt: Duration::from_millis(500),
            retries: 0,
            max_sockets: 64,
            bandwidth_bps: 1_000_000,
            packet_rate: 0,
            poll_type: PollType::Auto,
            show_closed: true,
            accessible: true,
        }
    }

    fn loopback_targets() -> Targets {
        let opts = Opts {
            targets: vec!["127.0.0.1".to_owned()],
            ..Opts::default()
        };
        Targets::parse(&opts).unwrap()
    }

    fn free_port() -> u16 {
        // Bind then drop: nothing listens on the port afterwards.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn finds_open_and_closed_loopback_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = free_port();

        let mut scanner = Scanner::new(
            options(),
            loopback_targets(),
            vec![open_port, closed_port],
            Blocklist::default(),
        )
        .unwrap();

        let summary = scanner.run().unwrap();

        assert_eq!(summary.open, 1);
        assert_eq!(summary.closed, 1);
        assert_eq!(summary.filtered, 0);
        assert_eq!(summary.probes_sent, 2);
    }

    #[test]
    fn refusal_is_terminal_and_spends_no_retries() {
        let closed_port = free_port();
        let mut opts = options();
        opts.retries = 2;

        let mut scanner = Scanner::new(
            opts,
            loopback_targets(),
            vec![closed_port],
            Blocklist::default(),
        )
        .unwrap();

        let summary = scanner.run().unwrap();

        assert_eq!(summary.closed, 1);
        // One attempt only: an RST answers the question.
        assert_eq!(summary.probes_sent, 1);
    }

    #[test]
    fn blocklisted_hosts_produce_no_traffic_and_no_verdict() {
        let blocklist = Blocklist::parse(&["127.0.0.1".to_owned()]).unwrap();
        let mut scanner =
            Scanner::new(options(), loopback_targets(), vec![80, 443], blocklist).unwrap();

        let summary = scanner.run().unwrap();

        assert_eq!(summary.probes_sent, 0);
        assert_eq!(summary.open + summary.closed + summary.filtered, 0);
    }

    #[test]
    fn every_endpoint_gets_exactly_one_verdict() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let mut ports = vec![open_port];
        for _ in 0..5 {
            ports.push(free_port());
        }
        ports.sort_unstable();
        ports.dedup();
        let expected = ports.len() as u64;

        let mut scanner =
            Scanner::new(options(), loopback_targets(), ports, Blocklist::default()).unwrap();
        let summary = scanner.run().unwrap();

        assert_eq!(summary.open + summary.closed + summary.filtered, expected);
    }

    #[test]
    fn auto_pool_size_tracks_rates() {
        // 74-byte probes at 250 kbit/s give a 2.368 ms gap; 1.5 RTTs of
        // headroom works out to 317 sockets before the OS cap bites.
        let gap = Duration::from_secs_f64(8.0 * 74.0 / 250_000.0);
        let resolved = resolve_max_sockets(None, Duration::from_millis(500), gap);
        assert!(resolved >= 1);
        assert!(resolved <= 317);
    }

    #[test]
    fn explicit_pool_size_is_respected() {
        let gap = Duration::from_secs_f64(8.0 * 74.0 / 250_000.0);
        let resolved = resolve_max_sockets(Some(50), Duration::from_millis(500), gap);
        assert_eq!(resolved, 50);
    }
}
