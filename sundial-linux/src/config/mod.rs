use std::{fs::read_to_string, net::Ipv4Addr, os::unix::fs::PermissionsExt, path::Path};

use log::warn;
use serde::{Deserialize, Deserializer};
use sundial::{
    config::{InstanceConfig, PortConfig},
    datastructures::common::{ClockAccuracy, ClockIdentity, TimeSource},
    time::Interval,
};

/// The configuration format revision this daemon understands.
pub const SUPPORTED_CONFIG_VERSION: &str = "1.4";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub config_version: String,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub basic: BasicConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BasicConfig {
    #[serde(default)]
    pub one_step_clock: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClockConfig {
    #[serde(default = "default_clock_class")]
    pub class: u8,
    /// Symbolic accuracy, e.g. "100ns" or "2,5ms"
    #[serde(default, deserialize_with = "deserialize_clock_accuracy")]
    pub accuracy: ClockAccuracy,
    #[serde(default = "default_priority")]
    pub priority1: u8,
    #[serde(default = "default_priority")]
    pub priority2: u8,
    #[serde(default)]
    pub domain: u8,
    /// Symbolic time source, e.g. "gps" or "internal oscillator"
    #[serde(default, deserialize_with = "deserialize_time_source")]
    pub source: TimeSource,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            class: default_clock_class(),
            accuracy: ClockAccuracy::default(),
            priority1: default_priority(),
            priority2: default_priority(),
            domain: 0,
            source: TimeSource::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct IntervalsConfig {
    #[serde(default = "default_announce_interval")]
    pub announce: i8,
    #[serde(default)]
    pub sync: i8,
    #[serde(default)]
    pub delay_req: i8,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            announce: default_announce_interval(),
            sync: 0,
            delay_req: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub multicast: bool,
    #[serde(default)]
    pub unicast: Vec<Ipv4Addr>,
    /// Known path asymmetry towards the master, in picoseconds
    #[serde(default)]
    pub delay_asymmetry: i64,
    /// Apply the asymmetry only when synchronized to this master
    #[serde(default, deserialize_with = "deserialize_clock_identity")]
    pub delay_asymmetry_master: Option<ClockIdentity>,
}

fn deserialize_clock_accuracy<'de, D>(deserializer: D) -> Result<ClockAccuracy, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: String = Deserialize::deserialize(deserializer)?;
    raw.parse()
        .map_err(|_| D::Error::custom(format!("unknown clock accuracy: {raw}")))
}

fn deserialize_time_source<'de, D>(deserializer: D) -> Result<TimeSource, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: String = Deserialize::deserialize(deserializer)?;
    raw.parse()
        .map_err(|_| D::Error::custom(format!("unknown time source: {raw}")))
}

fn deserialize_clock_identity<'de, D>(deserializer: D) -> Result<Option<ClockIdentity>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;

    let raw: String = Deserialize::deserialize(deserializer)?;
    Ok(Some(ClockIdentity(<[u8; 8]>::from_hex(raw).map_err(
        |e| D::Error::custom(format!("Invalid clock identifier: {}", e)),
    )?)))
}

impl Config {
    /// Parse config from file
    pub fn from_file(file: &Path) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(file).map_err(ConfigError::Io)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).map_err(ConfigError::Io)?;
        let config: Config = toml::de::from_str(&contents).map_err(ConfigError::Toml)?;

        if config.config_version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError::Version(config.config_version));
        }

        config.warn_when_unreasonable();
        Ok(config)
    }

    /// Warns about unreasonable config values
    pub fn warn_when_unreasonable(&self) {
        if self.interfaces.is_empty() {
            warn!("No interfaces configured.");
        }

        if self.interfaces.len() > 16 {
            warn!("Too many interfaces are configured.");
        }

        for interface in &self.interfaces {
            if !interface.multicast && interface.unicast.is_empty() {
                warn!(
                    "Interface {} has neither multicast nor unicast peers.",
                    interface.name
                );
            }
        }
    }

    pub fn instance_config(&self) -> InstanceConfig {
        InstanceConfig {
            clock_class: self.clock.class,
            clock_accuracy: self.clock.accuracy,
            priority_1: self.clock.priority1,
            priority_2: self.clock.priority2,
            domain_number: self.clock.domain,
            slave_only: false,
            one_step_clock: self.basic.one_step_clock,
            time_source: self.clock.source,
            log_announce_interval: Interval::from_log_2(self.intervals.announce),
        }
    }

    pub fn port_config(&self, interface: &InterfaceConfig) -> PortConfig {
        PortConfig {
            log_announce_interval: Interval::from_log_2(self.intervals.announce),
            log_sync_interval: Interval::from_log_2(self.intervals.sync),
            log_min_delay_req_interval: Interval::from_log_2(self.intervals.delay_req),
            announce_receipt_timeout: 4,
            delay_asymmetry: interface.delay_asymmetry,
            delay_asymmetry_master: interface.delay_asymmetry_master,
            unicast: !interface.multicast,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Version(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => writeln!(f, "io error while reading config: {e}"),
            ConfigError::Toml(e) => writeln!(f, "config toml parsing error: {e}"),
            ConfigError::Version(v) => writeln!(f, "config version {v} not supported"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_clock_class() -> u8 {
    248
}

fn default_priority() -> u8 {
    128
}

fn default_announce_interval() -> i8 {
    1
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal amount of config results in default values
    #[test]
    fn minimal_config() {
        const MINIMAL_CONFIG: &str = r#"
config-version = "1.4"

[[interface]]
name = "eth0"
"#;

        let expected_interface = InterfaceConfig {
            name: "eth0".to_owned(),
            multicast: true,
            unicast: vec![],
            delay_asymmetry: 0,
            delay_asymmetry_master: None,
        };

        let expected = Config {
            config_version: "1.4".to_owned(),
            general: GeneralConfig::default(),
            basic: BasicConfig::default(),
            clock: ClockConfig::default(),
            intervals: IntervalsConfig::default(),
            interfaces: vec![expected_interface],
        };

        let actual: Config = toml::from_str(MINIMAL_CONFIG).unwrap();

        assert_eq!(expected, actual);
    }

    #[test]
    fn full_config() {
        const FULL_CONFIG: &str = r#"
config-version = "1.4"

[general]
debug = true

[basic]
one-step-clock = true

[clock]
class = 6
accuracy = "2,5us"
priority1 = 100
priority2 = 101
domain = 2
source = "gps"

[intervals]
announce = 2
sync = -1
delay-req = 1

[[interface]]
name = "eth0"
multicast = false
unicast = ["192.168.7.1", "192.168.7.2"]
delay-asymmetry = 2500
delay-asymmetry-master = "0102030405060708"
"#;

        let actual: Config = toml::from_str(FULL_CONFIG).unwrap();

        assert!(actual.general.debug);
        assert!(actual.basic.one_step_clock);
        assert_eq!(actual.clock.class, 6);
        assert_eq!(actual.clock.accuracy, ClockAccuracy::US2_5);
        assert_eq!(actual.clock.source, TimeSource::Gps);
        assert_eq!(actual.intervals.sync, -1);
        assert_eq!(
            actual.interfaces[0].unicast,
            vec![
                "192.168.7.1".parse::<Ipv4Addr>().unwrap(),
                "192.168.7.2".parse().unwrap()
            ]
        );
        assert_eq!(
            actual.interfaces[0].delay_asymmetry_master,
            Some(ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]))
        );

        let instance_config = actual.instance_config();
        assert_eq!(instance_config.clock_class, 6);
        assert!(instance_config.one_step_clock);

        let port_config = actual.port_config(&actual.interfaces[0]);
        assert_eq!(port_config.log_sync_interval.as_log_2(), -1);
        assert_eq!(port_config.delay_asymmetry, 2500);
        assert!(port_config.unicast);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        const OLD_CONFIG: &str = r#"
config-version = "1.3"
"#;

        let config: Config = toml::from_str(OLD_CONFIG).unwrap();
        assert_ne!(config.config_version, SUPPORTED_CONFIG_VERSION);
    }

    #[test]
    fn symbolic_enums_are_validated() {
        const BAD_CONFIG: &str = r#"
config-version = "1.4"

[clock]
accuracy = "three weeks"
"#;

        assert!(toml::from_str::<Config>(BAD_CONFIG).is_err());
    }
}
