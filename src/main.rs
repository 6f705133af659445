//! Command line entry point: reads options, assembles the engine and
//! prints the closing statistics.

use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use log::debug;

use sweepscan::address::Targets;
use sweepscan::blocklist::Blocklist;
use sweepscan::error::ScanError;
use sweepscan::input::{Config, Opts};
use sweepscan::platform;
use sweepscan::port_strategy::PortStrategy;
use sweepscan::rate;
use sweepscan::scanner::{resolve_max_sockets, ScanOptions, ScanSummary, Scanner};
use sweepscan::{detail, output, warning};

fn main() -> ExitCode {
    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);

    let mut builder = env_logger::Builder::from_default_env();
    if opts.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
    debug!("main() `opts` arguments are {opts:?}");

    match scan(&opts) {
        Ok(summary) => {
            print_closing(&opts, &summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            if opts.accessible {
                eprintln!("{e}");
            } else {
                eprintln!("{} {e}", "[E]".red());
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn scan(opts: &Opts) -> Result<ScanSummary, ScanError> {
    validate(opts)?;

    if opts.bandwidth > 1_000_000 {
        warning!(
            format!(
                "Bandwidth {} bits/s is unusually high. Continuing anyway...",
                opts.bandwidth
            ),
            opts.greppable,
            opts.accessible
        );
    }

    if let Some(limit) = opts.ulimit {
        if platform::raise_descriptor_limit(limit) {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    let targets = Targets::parse(opts)?;
    let host_count = targets.count();

    let blocklist = match &opts.blocklist {
        Some(entries) => Blocklist::parse(entries)?,
        None => Blocklist::default(),
    };

    let ports = PortStrategy::pick(opts.ports.clone(), opts.order).into_ports();
    let port_count = ports.len();

    let rtt = Duration::from_secs_f64(opts.rtt);
    let packet_gap = rate::inter_packet_gap(opts.bandwidth, platform::PACKET_OVERHEAD_BYTES);
    let max_sockets = resolve_max_sockets(opts.max_sockets, rtt, packet_gap);

    if opts.closed && !platform::CAN_DETECT_REFUSED {
        warning!(
            "This platform cannot detect refused connections; closed ports are reported as filtered.",
            opts.greppable,
            opts.accessible
        );
    }

    let options = ScanOptions {
        rtt,
        retries: opts.retries,
        max_sockets,
        bandwidth_bps: opts.bandwidth,
        packet_rate: opts.packet_rate,
        poll_type: opts.poll_type,
        show_closed: opts.closed,
        accessible: opts.accessible,
    };

    let mut scanner = Scanner::new(options, targets, ports, blocklist)?;

    if !opts.greppable && !opts.no_banner {
        print_dump(
            opts,
            host_count,
            port_count,
            max_sockets,
            packet_gap,
            scanner.backend_name(),
            &scanner,
        );
    }

    scanner.run()
}

fn validate(opts: &Opts) -> Result<(), ScanError> {
    if opts.bandwidth < 1 {
        return Err(ScanError::Config(format!(
            "Bandwidth {} is too low",
            opts.bandwidth
        )));
    }
    if !opts.rtt.is_finite() || opts.rtt <= 0.0 {
        return Err(ScanError::Config(format!(
            "RTT {} must be a positive number of seconds",
            opts.rtt
        )));
    }
    if opts.max_sockets == Some(0) {
        return Err(ScanError::Config(String::from("Max sockets must be > 0")));
    }
    if opts.ports.is_empty() {
        return Err(ScanError::Config(String::from("No ports to scan")));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn print_dump(
    opts: &Opts,
    host_count: u64,
    port_count: usize,
    max_sockets: usize,
    packet_gap: Duration,
    backend: &str,
    scanner: &Scanner,
) {
    print_header("Starting Scan");
    println!("Target hosts: ................ {host_count}");
    println!("Target ports: ................ {port_count}");
    println!("Probes to send: .............. {}", scanner.total_probes());
    println!("Bandwidth: ................... {} bits/second", opts.bandwidth);
    if opts.packet_rate > 0 {
        println!("Packet rate: ................. {} packets/second", opts.packet_rate);
    }
    println!("RTT: ......................... {} seconds", opts.rtt);
    println!("Retries: ..................... {}", opts.retries);
    println!("Inter-packet interval: ....... {:?}", packet_gap);
    println!("Max sockets: ................. {max_sockets}");
    println!(
        "Packet overhead: ............. {} bytes",
        platform::PACKET_OVERHEAD_BYTES
    );
    println!("Poll type: ................... {backend}");
    println!("Show closed ports: ........... {}", opts.closed);
    print_footer();
}

fn print_closing(opts: &Opts, summary: &ScanSummary) {
    output!(
        format!(
            "Scan complete: {} open, {} closed, {} filtered",
            summary.open, summary.closed, summary.filtered
        ),
        opts.greppable,
        opts.accessible
    );

    let elapsed = summary.elapsed.as_secs_f64().max(0.001);
    let bits_per_second = (summary.bytes_sent as f64 * 8.0 / elapsed) as u64;
    detail!(
        format!(
            "Sent {} bytes in {} probes over {:.2}s: {} bits/s",
            summary.bytes_sent, summary.probes_sent, elapsed, bits_per_second
        ),
        opts.greppable,
        opts.accessible
    );
}

fn print_header(message: &str) {
    let width = 80;
    let message_len = message.len() + 2;
    let pad_left = (width - message_len) / 2;
    let pad_right = width - message_len - pad_left;
    println!("{} {} {}", "=".repeat(pad_left), message, "=".repeat(pad_right));
}

fn print_footer() {
    println!("{}", "=".repeat(80));
}
