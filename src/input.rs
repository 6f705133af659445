//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Parser, ValueEnum};
use itertools::Itertools;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Port ordering applied to the configured port list.
///   - Popular sorts by nmap service popularity, most popular first, so
///     likely-open ports resolve early in a long sweep.
///   - Serial scans the list in ascending order.
///   - Random shuffles the list.
///
/// The ordering only changes the sequence of the port-major sweep; every
/// host is still probed on one port before the next port begins.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Popular,
    Serial,
    Random,
}

/// Readiness backend used to wait on in-flight sockets.
///   - Poll uses the portable `poll(2)` interface.
///   - Epoll uses the scalable Linux backend.
///   - Auto prefers epoll where available and falls back to poll.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum PollType {
    Poll,
    Epoll,
    Auto,
}

pub type Ports = Vec<u16>;

/// Parses a port list such as `80`, `1-1024`, `22,80,8000-9000` or `all`.
/// The result is sorted and deduplicated.
pub fn parse_ports(input: &str) -> Result<Ports, String> {
    if input.trim().eq_ignore_ascii_case("all") {
        return Ok((LOWEST_PORT_NUMBER..=TOP_PORT_NUMBER).collect());
    }

    let mut ports: Ports = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    Ok(ports.into_iter().sorted().dedup().collect())
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

/// Parses a rate figure with an optional `k`, `m` or `g` suffix into a
/// plain count, e.g. `250k` -> 250 000.
pub fn parse_rate(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let (digits, multiplier) = match input.chars().last() {
        Some('k') | Some('K') => (&input[..input.len() - 1], 1_000),
        Some('m') | Some('M') => (&input[..input.len() - 1], 1_000_000),
        Some('g') | Some('G') => (&input[..input.len() - 1], 1_000_000_000),
        _ => (input, 1),
    };

    let value: u64 = digits.parse().map_err(|_| {
        format!("'{input}' should be an integer or an integer with a k, m or g suffix")
    })?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{input}' is too large"))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sweepscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Rate-limited TCP connect port scanner for unprivileged pivot hosts.
/// Probes are plain nonblocking connects, so no raw-socket privileges are
/// needed; bandwidth and packet-rate caps keep the footprint predictable.
pub struct Opts {
    /// IPs, CIDRs or IP ranges to be scanned, e.g. 10.0.0.1 10.0.1.0/24
    /// 10.0.2.1-10.0.2.50. IPv4 only.
    #[arg(conflicts_with = "file")]
    pub targets: Vec<String>,

    /// Newline-delimited file of target expressions. Lines starting with
    /// '#' and blank lines are ignored.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// A list of ports and/or port ranges to be scanned, or "all".
    /// Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, value_parser = parse_ports, default_value = "1-65535")]
    pub ports: Ports,

    /// Bandwidth cap in bits/second; accepts k, m and g suffixes.
    #[arg(short, long, value_parser = parse_rate, default_value = "250k")]
    pub bandwidth: u64,

    /// Packet rate cap in packets/second; accepts suffixes; 0 = unlimited.
    #[arg(short = 'P', long, value_parser = parse_rate, default_value = "0")]
    pub packet_rate: u64,

    /// Per-probe deadline in seconds. A probe with no answer after this
    /// long is retried or reported filtered.
    #[arg(short = 'R', long, default_value = "0.5")]
    pub rtt: f64,

    /// Maximum simultaneously open sockets. Derived from the rate caps and
    /// the open-files limit when not given.
    #[arg(short, long)]
    pub max_sockets: Option<u64>,

    /// Retries per probe. Only timed-out probes are retried; refused and
    /// unreachable results are final.
    #[arg(short, long, default_value = "2")]
    pub retries: u8,

    /// Readiness backend to wait on sockets with.
    #[arg(short = 't', long, value_enum, ignore_case = true, default_value = "auto")]
    pub poll_type: PollType,

    /// Report closed and filtered ports as well as open ones. Ignored on
    /// platforms that cannot tell a refused connection from a timeout.
    #[arg(short, long)]
    pub closed: bool,

    /// Comma-separated IPs to exclude from the scan. Useful for network
    /// and broadcast addresses that some platforms refuse to probe.
    #[arg(short = 'B', long, value_delimiter = ',')]
    pub blocklist: Option<Vec<String>>,

    /// Verbose diagnostic output.
    #[arg(short, long)]
    pub debug: bool,

    /// The order in which the port list is swept.
    #[arg(long, value_enum, ignore_case = true, default_value = "popular")]
    pub order: ScanOrder,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Accessible mode. Turns off features which negatively affect screen
    /// readers.
    #[arg(long)]
    pub accessible: bool,

    /// Greppable mode. Only output verdict lines. Useful for grep or
    /// outputting to a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Hide the opening settings dump.
    #[arg(long)]
    pub no_banner: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merge values found within the user configuration file into the
    /// options read from the command line.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            bandwidth,
            packet_rate,
            rtt,
            retries,
            poll_type,
            closed,
            order,
            accessible,
            greppable
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        if let Some(ports) = &config.ports {
            self.ports = ports.clone();
        }

        merge_optional!(max_sockets, blocklist);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            targets: vec![],
            file: None,
            ports: (LOWEST_PORT_NUMBER..=TOP_PORT_NUMBER).collect(),
            bandwidth: 250_000,
            packet_rate: 0,
            rtt: 0.5,
            max_sockets: None,
            retries: 2,
            poll_type: PollType::Auto,
            closed: false,
            blocklist: None,
            debug: false,
            order: ScanOrder::Popular,
            ulimit: None,
            accessible: false,
            greppable: false,
            no_banner: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
///
/// Note that `bandwidth` and `packet_rate` are plain numbers here (bits
/// and packets per second); the k/m/g suffixes are a command-line nicety.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    ports: Option<Vec<u16>>,
    bandwidth: Option<u64>,
    packet_rate: Option<u64>,
    rtt: Option<f64>,
    max_sockets: Option<u64>,
    retries: Option<u8>,
    poll_type: Option<PollType>,
    closed: Option<bool>,
    blocklist: Option<Vec<String>>,
    order: Option<ScanOrder>,
    accessible: Option<bool>,
    greppable: Option<bool>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// ports = [80, 443, 8080]
    /// bandwidth = 250000
    /// rtt = 0.5
    /// retries = 2
    /// closed = true
    /// order = "Popular"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = fs::read_to_string(config_path).unwrap_or_default();
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting scan.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".sweepscan.toml");
    config_path
}
