//! Builder for [`ShipperConfig`].
//!
//! Every setting is optional until [`ShipperBuilder::build`] validates the
//! combination and fills in defaults. Later setters override earlier ones,
//! so an INI file can be loaded first and command line flags layered on
//! top.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use encoding_rs::Encoding;

use crate::{
    delivery::DeliveryConfig,
    error::BuildError,
    log_record::ShipperIdentity,
    pending::OverflowPolicy,
    tail::{MAX_POLL_INTERVAL, StartPosition, TailConfig},
    transport::{DEFAULT_IDLE_TIMEOUT, DEFAULT_KEEP_ALIVE, TransportConfig},
};

/// File followed when no path is configured.
pub const DEFAULT_FILE: &str = "log.txt";
/// Hostname reported when neither a flag nor `HOSTNAME` provides one.
pub const DEFAULT_HOSTNAME: &str = "localhost";
/// Program name used in syslog mode.
pub const SYSLOG_PROGRAM: &str = "syslog";

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Everything a [`Shipper`](crate::shipper::Shipper) needs to run.
#[derive(Clone, Debug)]
pub struct ShipperConfig {
    /// File to follow.
    pub path: PathBuf,
    pub tail: TailConfig,
    pub transport: TransportConfig,
    pub delivery: DeliveryConfig,
    pub identity: ShipperIdentity,
}

#[derive(Clone, Debug)]
struct CollectorConfig {
    host: String,
    port: u16,
}

/// Fluent, validating builder for [`ShipperConfig`].
#[derive(Clone, Debug, Default)]
pub struct ShipperBuilder {
    path: Option<PathBuf>,
    collector: Option<CollectorConfig>,
    server_name: Option<String>,
    insecure: Option<bool>,
    ca_file: Option<PathBuf>,
    alpn: Option<String>,
    connect_timeout_ms: Option<u64>,
    keep_alive_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    heartbeat_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    start: Option<StartPosition>,
    line_capacity: Option<usize>,
    max_line_bytes: Option<usize>,
    encoding: Option<&'static Encoding>,
    reopen_timeout_ms: Option<u64>,
    pending_capacity: Option<usize>,
    overflow: Option<OverflowPolicy>,
    hostname: Option<String>,
    program: Option<String>,
    pid: Option<u32>,
    syslog: bool,
}

impl ShipperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector to connect to.
    pub fn with_collector(mut self, host: impl Into<String>, port: u16) -> Self {
        self.collector = Some(CollectorConfig {
            host: host.into(),
            port,
        });
        self
    }

    /// Collector given as `host:port` or `[v6]:port`.
    pub fn with_collector_address(self, addr: &str) -> Result<Self, BuildError> {
        let (host, port) = TransportConfig::parse_address(addr).map_err(BuildError::InvalidConfig)?;
        Ok(self.with_collector(host, port))
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Trust the certificates in this PEM file instead of the platform roots.
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Name to verify the collector certificate against. Defaults to the
    /// collector host.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_alpn(mut self, protocol: impl Into<String>) -> Self {
        self.alpn = Some(protocol.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Report syslog as the program unless one is set explicitly.
    pub fn with_syslog(mut self, syslog: bool) -> Self {
        self.syslog = syslog;
        self
    }

    option_setter!(
        #[doc = "Accept any certificate the collector presents."]
        with_insecure,
        insecure,
        bool
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_keep_alive_ms, keep_alive_ms, u64);
    option_setter!(with_idle_timeout_ms, idle_timeout_ms, u64);
    option_setter!(with_heartbeat_ms, heartbeat_ms, u64);
    option_setter!(with_poll_interval_ms, poll_interval_ms, u64);
    option_setter!(with_start, start, StartPosition);
    option_setter!(
        #[doc = "Set the bounded queue capacity between file poller and delivery."]
        with_line_capacity,
        line_capacity,
        usize
    );
    option_setter!(with_max_line_bytes, max_line_bytes, usize);
    option_setter!(with_encoding, encoding, &'static Encoding);
    option_setter!(
        #[doc = "Wait this long for a removed file to return. Zero waits forever."]
        with_reopen_timeout_ms,
        reopen_timeout_ms,
        u64
    );
    option_setter!(with_pending_capacity, pending_capacity, usize);
    option_setter!(with_overflow, overflow, OverflowPolicy);
    option_setter!(with_pid, pid, u32);

    /// Validate the settings and produce a runnable configuration.
    pub fn build(&self) -> Result<ShipperConfig, BuildError> {
        self.validate()?;
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE));
        Ok(ShipperConfig {
            tail: self.build_tail(),
            transport: self.build_transport()?,
            delivery: self.build_delivery(),
            identity: self.build_identity(&path),
            path,
        })
    }

    fn validate(&self) -> Result<(), BuildError> {
        self.validate_collector()?;
        self.validate_timeouts()?;
        self.validate_tail()?;
        if let Some(capacity) = self.pending_capacity {
            ensure_positive!(capacity, "pending_capacity")?;
        }
        Ok(())
    }

    fn validate_collector(&self) -> Result<(), BuildError> {
        match &self.collector {
            None => Err(BuildError::InvalidConfig(
                "a collector address is required".into(),
            )),
            Some(collector) if collector.host.trim().is_empty() => Err(
                BuildError::InvalidConfig("collector host must not be empty".into()),
            ),
            Some(collector) if collector.port == 0 => Err(BuildError::InvalidConfig(
                "collector port must not be zero".into(),
            )),
            Some(_) => {
                if let Some(alpn) = &self.alpn
                    && (alpn.is_empty() || alpn.len() > 255 || !alpn.is_ascii())
                {
                    return Err(BuildError::InvalidConfig(format!(
                        "alpn {alpn:?} must be 1 to 255 ASCII bytes"
                    )));
                }
                Ok(())
            }
        }
    }

    fn validate_timeouts(&self) -> Result<(), BuildError> {
        if let Some(timeout) = self.connect_timeout_ms {
            ensure_positive!(timeout, "connect_timeout_ms")?;
        }
        if let Some(timeout) = self.keep_alive_ms {
            ensure_positive!(timeout, "keep_alive_ms")?;
        }
        if let Some(timeout) = self.idle_timeout_ms {
            ensure_positive!(timeout, "idle_timeout_ms")?;
        }
        if let Some(interval) = self.heartbeat_ms {
            ensure_positive!(interval, "heartbeat_ms")?;
        }
        let keep_alive = self
            .keep_alive_ms
            .map_or(DEFAULT_KEEP_ALIVE, Duration::from_millis);
        let idle = self
            .idle_timeout_ms
            .map_or(DEFAULT_IDLE_TIMEOUT, Duration::from_millis);
        if keep_alive >= idle {
            return Err(BuildError::InvalidConfig(format!(
                "keep-alive interval ({}ms) must be shorter than the idle timeout ({}ms)",
                keep_alive.as_millis(),
                idle.as_millis()
            )));
        }
        Ok(())
    }

    fn validate_tail(&self) -> Result<(), BuildError> {
        if let Some(interval) = self.poll_interval_ms {
            ensure_positive!(interval, "poll_interval_ms")?;
            if Duration::from_millis(interval) > MAX_POLL_INTERVAL {
                return Err(BuildError::InvalidConfig(format!(
                    "poll_interval_ms must not exceed {}",
                    MAX_POLL_INTERVAL.as_millis()
                )));
            }
        }
        if let Some(capacity) = self.line_capacity {
            ensure_positive!(capacity, "line_capacity")?;
        }
        if let Some(bytes) = self.max_line_bytes {
            ensure_positive!(bytes, "max_line_bytes")?;
        }
        Ok(())
    }

    fn build_tail(&self) -> TailConfig {
        let mut tail = TailConfig::default();
        if let Some(start) = self.start {
            tail.start = start;
        }
        if let Some(interval) = self.poll_interval_ms {
            tail.poll_interval = Duration::from_millis(interval);
        }
        if let Some(capacity) = self.line_capacity {
            tail.capacity = capacity;
        }
        if let Some(bytes) = self.max_line_bytes {
            tail.max_line_bytes = bytes;
        }
        if let Some(encoding) = self.encoding {
            tail.encoding = encoding;
        }
        if let Some(timeout) = self.reopen_timeout_ms {
            tail.reopen_timeout = (timeout > 0).then(|| Duration::from_millis(timeout));
        }
        tail
    }

    fn build_transport(&self) -> Result<TransportConfig, BuildError> {
        let collector = self
            .collector
            .as_ref()
            .ok_or_else(|| BuildError::InvalidConfig("a collector address is required".into()))?;
        let mut transport = TransportConfig::new(collector.host.clone(), collector.port);
        if let Some(name) = self.server_name.as_ref().filter(|n| !n.trim().is_empty()) {
            transport.tls.domain = name.clone();
        }
        if let Some(insecure) = self.insecure {
            transport.tls.insecure_skip_verify = insecure;
        }
        transport.tls.ca_file.clone_from(&self.ca_file);
        if let Some(alpn) = &self.alpn {
            transport.tls.alpn = alpn.clone();
        }
        if let Some(timeout) = self.connect_timeout_ms {
            transport.connect_timeout = Duration::from_millis(timeout);
        }
        if let Some(timeout) = self.keep_alive_ms {
            transport.keep_alive = Duration::from_millis(timeout);
        }
        if let Some(timeout) = self.idle_timeout_ms {
            transport.idle_timeout = Duration::from_millis(timeout);
        }
        Ok(transport)
    }

    fn build_delivery(&self) -> DeliveryConfig {
        let mut delivery = DeliveryConfig::default();
        if let Some(interval) = self.heartbeat_ms {
            delivery.heartbeat_interval = Duration::from_millis(interval);
        }
        if let Some(capacity) = self.pending_capacity {
            delivery.pending_capacity = capacity;
        }
        if let Some(overflow) = self.overflow {
            delivery.overflow = overflow;
        }
        delivery
    }

    fn build_identity(&self, path: &Path) -> ShipperIdentity {
        let hostname = self
            .hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_owned());
        let program = self
            .program
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| default_program(path, self.syslog));
        ShipperIdentity::new(hostname, program, self.pid.unwrap_or_else(std::process::id))
    }
}

fn default_program(path: &Path, syslog: bool) -> String {
    if syslog {
        return SYSLOG_PROGRAM.to_owned();
    }
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned())
}
