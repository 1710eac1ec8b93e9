//! JSON configuration file. Keys mirror the hotspot's three concerns:
//! the repeater identity, the modem hardware and the internet gateway.
//! Validation runs once at startup and is fatal; optional keys fall back
//! to defaults with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use m17spot_core::{Callsign, TypeVersion};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0:?} is not a valid M17 callsign")]
    BadCallsign(String),
    #[error("module must be a single letter A-Z, got {0:?}")]
    BadModule(String),
    #[error("at least one of IPv4/IPv6 must be enabled")]
    NoIpFamily,
    #[error("RX and TX frequencies must be set")]
    NoFrequency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "Repeater")]
    pub repeater: Repeater,
    #[serde(rename = "Modem")]
    pub modem: Modem,
    #[serde(rename = "Gateway")]
    pub gateway: Gateway,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repeater {
    #[serde(rename = "Callsign")]
    pub callsign: String,
    #[serde(rename = "Module", default = "default_module")]
    pub module: String,
    #[serde(rename = "CAN", default)]
    pub can: u8,
    #[serde(rename = "RadioTypeIsV3", default)]
    pub radio_type_is_v3: bool,
    #[serde(rename = "Debug", default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Modem {
    #[serde(rename = "UartDevice", default = "default_uart")]
    pub uart_device: String,
    #[serde(rename = "UartBaudRate", default = "default_baud")]
    pub uart_baud_rate: u32,
    #[serde(rename = "RXFrequency", default)]
    pub rx_frequency: u32,
    #[serde(rename = "TXFrequency", default)]
    pub tx_frequency: u32,
    #[serde(rename = "AFC", default)]
    pub afc: bool,
    #[serde(rename = "FreqCorrection", default)]
    pub freq_correction: i16,
    #[serde(rename = "TXPower", default = "default_power")]
    pub tx_power: f32,
    #[serde(rename = "Debug", default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gateway {
    #[serde(rename = "EnableIPv4", default = "default_true")]
    pub enable_ipv4: bool,
    #[serde(rename = "EnableIPv6", default)]
    pub enable_ipv6: bool,
    #[serde(rename = "StartupLink", default)]
    pub startup_link: String,
    #[serde(rename = "MaintainLink", default)]
    pub maintain_link: bool,
    #[serde(rename = "HostPath", default = "default_host_path")]
    pub host_path: String,
    #[serde(rename = "MyHostPath", default)]
    pub my_host_path: String,
    #[serde(rename = "AudioFolderPath", default = "default_audio_path")]
    pub audio_folder_path: String,
}

fn default_module() -> String {
    String::new()
}

fn default_uart() -> String {
    "/dev/ttyAMA0".into()
}

fn default_baud() -> u32 {
    460_800
}

fn default_power() -> f32 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_host_path() -> String {
    "/usr/local/etc/m17hosts.cfg".into()
}

fn default_audio_path() -> String {
    "/usr/local/etc/m17spot-audio".into()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cs = Callsign::new(&self.repeater.callsign);
        if cs.code() == 0 || cs.text() != self.repeater.callsign.trim().to_uppercase() {
            return Err(ConfigError::BadCallsign(self.repeater.callsign.clone()));
        }
        let module = self.repeater.module.trim();
        if !module.is_empty() {
            let ok = module.len() == 1
                && module
                    .chars()
                    .next()
                    .is_some_and(|m| m.is_ascii_uppercase());
            if !ok {
                return Err(ConfigError::BadModule(self.repeater.module.clone()));
            }
        }
        if !self.gateway.enable_ipv4 && !self.gateway.enable_ipv6 {
            return Err(ConfigError::NoIpFamily);
        }
        if self.modem.rx_frequency == 0 || self.modem.tx_frequency == 0 {
            return Err(ConfigError::NoFrequency);
        }
        if self.gateway.my_host_path.is_empty() {
            warn!("MyHostPath not set, personal host overrides disabled");
        }
        Ok(())
    }

    /// Node callsign with the repeater module as its ninth character.
    #[must_use]
    pub fn node_callsign(&self) -> Callsign {
        let mut cs = Callsign::new(&self.repeater.callsign);
        if let Some(m) = self.repeater.module.trim().chars().next() {
            cs.set_module(m);
        }
        cs
    }

    #[must_use]
    pub fn type_version(&self) -> TypeVersion {
        if self.repeater.radio_type_is_v3 {
            TypeVersion::V3
        } else {
            TypeVersion::Legacy
        }
    }
}
