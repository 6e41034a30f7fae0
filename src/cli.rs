use std::{io::Write, path::PathBuf};

use clap::Parser;
use env_logger::Env;

use femtoship::{
    builder::{ShipperBuilder, ShipperConfig},
    error::BuildError,
    file_config,
    tail::StartPosition,
};

/// Follow a log file and ship each new line to a collector over TLS.
#[derive(Parser, Debug, Clone)]
#[command(name = "femtoship", version)]
pub struct Cli {
    /// File to follow [default: log.txt]
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Collector address as HOST:PORT
    #[arg(long)]
    pub collector: Option<String>,

    /// Name to verify the collector certificate against (defaults to the host)
    #[arg(long)]
    pub server_name: Option<String>,

    /// Accept any certificate the collector presents
    #[arg(long)]
    pub insecure: bool,

    /// PEM file of CA certificates to trust instead of the system roots
    #[arg(long, value_name = "PEM")]
    pub ca_file: Option<PathBuf>,

    /// Application protocol identifier required from the collector
    #[arg(long)]
    pub alpn: Option<String>,

    /// Seconds between heartbeats
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,

    /// Seconds between QUIC keep-alive packets
    #[arg(long)]
    pub keep_alive_secs: Option<u64>,

    /// Seconds without traffic before the collector is considered gone
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Bound on the QUIC handshake
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Ship the existing content of the file before following it
    #[arg(long)]
    pub from_start: bool,

    /// Hostname stamped on each record
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    /// Program name stamped on each record (defaults to the file stem)
    #[arg(long)]
    pub program: Option<String>,

    /// Report records as coming from syslog
    #[arg(long)]
    pub syslog: bool,

    /// INI file read before the flags above are applied
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// env_logger-style filter string (e.g. "info,femtoship=debug"); overrides RUST_LOG/defaults
    #[arg(long)]
    pub log_filter: Option<String>,
}

pub const DEFAULT_LOG_FILTER: &str = "info";

impl Cli {
    /// Merge the optional INI file with the flags; flags win.
    pub fn shipper_config(&self) -> Result<ShipperConfig, BuildError> {
        let mut builder = match &self.config {
            Some(path) => file_config::load(path, ShipperBuilder::new())?,
            None => ShipperBuilder::new(),
        };
        if let Some(file) = &self.file {
            builder = builder.with_path(file);
        }
        if let Some(collector) = &self.collector {
            builder = builder.with_collector_address(collector)?;
        }
        if let Some(name) = &self.server_name {
            builder = builder.with_server_name(name);
        }
        if self.insecure {
            builder = builder.with_insecure(true);
        }
        if let Some(path) = &self.ca_file {
            builder = builder.with_ca_file(path);
        }
        if let Some(alpn) = &self.alpn {
            builder = builder.with_alpn(alpn);
        }
        if let Some(secs) = self.heartbeat_secs {
            builder = builder.with_heartbeat_ms(secs.saturating_mul(1000));
        }
        if let Some(secs) = self.keep_alive_secs {
            builder = builder.with_keep_alive_ms(secs.saturating_mul(1000));
        }
        if let Some(secs) = self.idle_timeout_secs {
            builder = builder.with_idle_timeout_ms(secs.saturating_mul(1000));
        }
        if let Some(secs) = self.connect_timeout_secs {
            builder = builder.with_connect_timeout_ms(secs.saturating_mul(1000));
        }
        if self.from_start {
            builder = builder.with_start(StartPosition::Beginning);
        }
        if let Some(hostname) = &self.hostname {
            builder = builder.with_hostname(hostname);
        }
        if let Some(program) = &self.program {
            builder = builder.with_program(program);
        }
        if self.syslog {
            builder = builder.with_syslog(true);
        }
        builder.build()
    }
}

pub fn init_logging(cli_filter: Option<&str>) {
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_secs();
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.init();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["femtoship"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments parse")
    }

    #[rstest]
    fn flags_reach_the_config() {
        let cli = parse(&[
            "--file",
            "/var/log/app.log",
            "--collector",
            "collector:8081",
            "--insecure",
            "--ca-file",
            "/etc/femtoship/ca.pem",
            "--heartbeat-secs",
            "2",
            "--from-start",
            "--hostname",
            "web-1",
        ]);
        let config = cli.shipper_config().expect("valid config");
        assert_eq!(config.path, PathBuf::from("/var/log/app.log"));
        assert_eq!(config.transport.address(), "collector:8081");
        assert!(config.transport.tls.insecure_skip_verify);
        assert_eq!(
            config.transport.tls.ca_file,
            Some(PathBuf::from("/etc/femtoship/ca.pem"))
        );
        assert_eq!(config.delivery.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.tail.start, StartPosition::Beginning);
        assert_eq!(config.identity.hostname, "web-1");
        assert_eq!(config.identity.program, "app");
    }

    #[rstest]
    fn missing_collector_is_a_config_error() {
        let cli = parse(&["--hostname", "web-1"]);
        assert!(matches!(
            cli.shipper_config(),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[rstest]
    fn syslog_mode_names_the_program() {
        let cli = parse(&["--collector", "c:1", "--syslog", "--hostname", "h"]);
        assert_eq!(cli.shipper_config().unwrap().identity.program, "syslog");
    }

    #[rstest]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[collector]\naddress = from-file:9000\n[delivery]\nheartbeat_secs = 9\n")
            .unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let cli = parse(&["--config", &path, "--heartbeat-secs", "3", "--hostname", "h"]);
        let config = cli.shipper_config().unwrap();
        assert_eq!(config.transport.address(), "from-file:9000");
        assert_eq!(config.delivery.heartbeat_interval, Duration::from_secs(3));
    }
}
