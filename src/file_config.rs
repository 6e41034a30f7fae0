//! INI configuration files.
//!
//! Settings are read with `rust-ini` and applied onto a [`ShipperBuilder`],
//! so command line flags applied afterwards take precedence. Recognised
//! sections:
//!
//! ```ini
//! [collector]
//! address = logs.example.com:8081
//! server_name = logs.example.com
//! insecure = false
//! ca_file = /etc/femtoship/ca.pem
//! alpn = quic-log-protocol
//! connect_timeout_secs = 10
//! keep_alive_secs = 15
//! idle_timeout_secs = 30
//!
//! [tail]
//! file = /var/log/app.log
//! start = end
//! poll_interval_ms = 250
//! line_capacity = 1024
//! max_line_bytes = 1048576
//! encoding = utf-8
//! reopen_timeout_secs = 60
//!
//! [delivery]
//! heartbeat_secs = 5
//! pending_capacity = 500
//! overflow = drop-oldest
//!
//! [identity]
//! hostname = web-1
//! program = app
//! syslog = false
//! ```
//!
//! Unknown sections and keys are rejected so typos do not pass silently.

use std::{fs, io::ErrorKind, path::Path, str::FromStr};

use encoding_rs::{Encoding, UTF_8};
use ini::{Ini, Properties};

use crate::{builder::ShipperBuilder, error::BuildError};

/// Load `path` and apply its settings onto `builder`.
pub fn load(path: &Path, builder: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => {
            BuildError::InvalidConfig(format!("{} doesn't exist", path.display()))
        }
        _ => BuildError::Io(err),
    })?;
    if bytes.is_empty() {
        return Err(BuildError::InvalidConfig(format!(
            "{} is an empty file",
            path.display()
        )));
    }
    let (text, _, had_errors) = UTF_8.decode(&bytes);
    if had_errors {
        return Err(BuildError::InvalidConfig(format!(
            "{} is not valid utf-8",
            path.display()
        )));
    }
    apply_str(&text, builder)
}

/// Apply settings from INI text onto `builder`.
pub fn apply_str(text: &str, builder: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    let ini = Ini::load_from_str(text).map_err(|err| BuildError::Ini(ini::Error::Parse(err)))?;
    let mut builder = builder;
    for (section, props) in ini.iter() {
        builder = match section {
            None if props.is_empty() => builder,
            None => {
                return Err(BuildError::InvalidConfig(
                    "settings must live inside a section".into(),
                ));
            }
            Some("collector") => apply_collector(props, builder)?,
            Some("tail") => apply_tail(props, builder)?,
            Some("delivery") => apply_delivery(props, builder)?,
            Some("identity") => apply_identity(props, builder)?,
            Some(other) => {
                return Err(BuildError::InvalidConfig(format!(
                    "unknown section [{other}]"
                )));
            }
        };
    }
    Ok(builder)
}

fn apply_collector(props: &Properties, mut b: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    for (key, value) in props.iter() {
        b = match key {
            "address" => b.with_collector_address(value)?,
            "server_name" => b.with_server_name(value),
            "insecure" => b.with_insecure(parse_bool("collector", key, value)?),
            "ca_file" => b.with_ca_file(value),
            "alpn" => b.with_alpn(value),
            "connect_timeout_secs" => b.with_connect_timeout_ms(secs_to_ms(key, value)?),
            "keep_alive_secs" => b.with_keep_alive_ms(secs_to_ms(key, value)?),
            "idle_timeout_secs" => b.with_idle_timeout_ms(secs_to_ms(key, value)?),
            _ => return Err(unknown_key("collector", key)),
        };
    }
    Ok(b)
}

fn apply_tail(props: &Properties, mut b: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    for (key, value) in props.iter() {
        b = match key {
            "file" => b.with_path(value),
            "start" => b.with_start(parse_value("tail", key, value)?),
            "poll_interval_ms" => b.with_poll_interval_ms(parse_value("tail", key, value)?),
            "line_capacity" => b.with_line_capacity(parse_value("tail", key, value)?),
            "max_line_bytes" => b.with_max_line_bytes(parse_value("tail", key, value)?),
            "encoding" => b.with_encoding(parse_encoding(value)?),
            "reopen_timeout_secs" => b.with_reopen_timeout_ms(secs_to_ms(key, value)?),
            _ => return Err(unknown_key("tail", key)),
        };
    }
    Ok(b)
}

fn apply_delivery(props: &Properties, mut b: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    for (key, value) in props.iter() {
        b = match key {
            "heartbeat_secs" => b.with_heartbeat_ms(secs_to_ms(key, value)?),
            "pending_capacity" => b.with_pending_capacity(parse_value("delivery", key, value)?),
            "overflow" => b.with_overflow(parse_value("delivery", key, value)?),
            _ => return Err(unknown_key("delivery", key)),
        };
    }
    Ok(b)
}

fn apply_identity(props: &Properties, mut b: ShipperBuilder) -> Result<ShipperBuilder, BuildError> {
    for (key, value) in props.iter() {
        b = match key {
            "hostname" => b.with_hostname(value),
            "program" => b.with_program(value),
            "syslog" => b.with_syslog(parse_bool("identity", key, value)?),
            _ => return Err(unknown_key("identity", key)),
        };
    }
    Ok(b)
}

fn unknown_key(section: &str, key: &str) -> BuildError {
    BuildError::InvalidConfig(format!("unknown key {key:?} in [{section}]"))
}

fn parse_value<T>(section: &str, key: &str, value: &str) -> Result<T, BuildError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| {
        BuildError::InvalidConfig(format!("[{section}] {key} = {value:?}: {err}"))
    })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, BuildError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BuildError::InvalidConfig(format!(
            "[{section}] {key} = {value:?} is not a boolean"
        ))),
    }
}

fn secs_to_ms(key: &str, value: &str) -> Result<u64, BuildError> {
    let secs: u64 = parse_value("config", key, value)?;
    secs.checked_mul(1000)
        .ok_or_else(|| BuildError::InvalidConfig(format!("{key} = {secs} is too large")))
}

/// Resolve an encoding label such as `utf-8` or `latin1`.
pub fn parse_encoding(label: &str) -> Result<&'static Encoding, BuildError> {
    let normalized = label.trim().to_ascii_lowercase();
    Encoding::for_label(normalized.as_bytes())
        .ok_or_else(|| BuildError::InvalidConfig(format!("unknown encoding {label}")))
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::PathBuf, time::Duration};

    use encoding_rs::WINDOWS_1252;
    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::{pending::OverflowPolicy, tail::StartPosition};

    const FULL: &str = "\
[collector]
address = logs.example.com:8081
server_name = logs.internal
insecure = yes
ca_file = /etc/femtoship/ca.pem
connect_timeout_secs = 3

[tail]
file = /var/log/app.log
start = beginning
poll_interval_ms = 100
encoding = latin1
reopen_timeout_secs = 0

[delivery]
heartbeat_secs = 2
pending_capacity = 10
overflow = reject-new

[identity]
hostname = web-1
syslog = true
";

    #[rstest]
    fn applies_every_section() {
        let config = apply_str(FULL, ShipperBuilder::new())
            .expect("valid ini")
            .build()
            .expect("valid config");
        assert_eq!(config.transport.address(), "logs.example.com:8081");
        assert_eq!(config.transport.tls.domain, "logs.internal");
        assert!(config.transport.tls.insecure_skip_verify);
        assert_eq!(
            config.transport.tls.ca_file,
            Some(PathBuf::from("/etc/femtoship/ca.pem"))
        );
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.path, PathBuf::from("/var/log/app.log"));
        assert_eq!(config.tail.start, StartPosition::Beginning);
        assert_eq!(config.tail.poll_interval, Duration::from_millis(100));
        assert_eq!(config.tail.encoding, WINDOWS_1252);
        assert_eq!(config.tail.reopen_timeout, None);
        assert_eq!(config.delivery.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.delivery.pending_capacity, 10);
        assert_eq!(config.delivery.overflow, OverflowPolicy::RejectNew);
        assert_eq!(config.identity.hostname, "web-1");
        assert_eq!(config.identity.program, "syslog");
    }

    #[rstest]
    fn later_builder_calls_override_the_file() {
        let config = apply_str(FULL, ShipperBuilder::new())
            .unwrap()
            .with_heartbeat_ms(500)
            .build()
            .unwrap();
        assert_eq!(config.delivery.heartbeat_interval, Duration::from_millis(500));
    }

    #[rstest]
    #[case::section("[network]\nport = 1\n", "unknown section")]
    #[case::key("[tail]\nfollow = yes\n", "unknown key")]
    #[case::bool("[collector]\ninsecure = maybe\n", "not a boolean")]
    #[case::number("[tail]\nline_capacity = lots\n", "line_capacity")]
    #[case::encoding("[tail]\nencoding = klingon\n", "unknown encoding")]
    #[case::address("[collector]\naddress = nowhere\n", "missing a port")]
    fn rejects_invalid_settings(#[case] text: &str, #[case] needle: &str) {
        let err = apply_str(text, ShipperBuilder::new()).expect_err("must be rejected");
        assert!(err.to_string().contains(needle), "unexpected error {err}");
    }

    #[rstest]
    fn loads_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[collector]\naddress = 127.0.0.1:9000\n").unwrap();
        let config = load(file.path(), ShipperBuilder::new())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.transport.address(), "127.0.0.1:9000");
    }

    #[rstest]
    fn empty_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let err = load(file.path(), ShipperBuilder::new()).expect_err("empty file");
        assert!(err.to_string().contains("empty file"));
    }

    #[rstest]
    fn missing_file_is_reported() {
        let err = load(Path::new("/nonexistent/femtoship.ini"), ShipperBuilder::new())
            .expect_err("missing file");
        assert!(err.to_string().contains("doesn't exist"));
    }
}
