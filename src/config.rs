use anyhow::{bail, Context, Result};
use pomas_lib::protocol::{Address, Sensor, SensorKind};
use serde::Deserialize;
use std::{fs::File, path::Path, time::Duration};

/// Sensors of the POMAS greenhouse installation.
const BUILTIN_REGISTRY: [(u8, SensorKind); 12] = [
    (0x01, SensorKind::Soil),
    (0x02, SensorKind::Soil),
    (0x03, SensorKind::Soil),
    (0x04, SensorKind::Soil),
    (0x05, SensorKind::Soil),
    (0x06, SensorKind::Soil),
    (0x07, SensorKind::Ph),
    (0x08, SensorKind::Ph),
    (0x09, SensorKind::Ph),
    (0x10, SensorKind::Ph),
    (0x11, SensorKind::Ph),
    (0x12, SensorKind::Ph),
];

/// The sensors on the bus and optional polling settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Registry {
    pub sensors: Vec<Sensor>,
    /// Inter-frame delay used when none is given on the command line.
    #[serde(default, with = "humantime_serde")]
    pub delay: Option<Duration>,
}

impl Registry {
    pub fn builtin() -> Self {
        let sensors = BUILTIN_REGISTRY
            .iter()
            .map(|(address, kind)| Sensor::new(Address::from(*address), *kind))
            .collect();
        Self {
            sensors,
            delay: None,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let registry: Registry =
            serde_yaml::from_str(yaml).context("Invalid sensor registry")?;
        registry.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.sensors.is_empty() {
            bail!("The sensor registry does not contain any sensor");
        }
        for (index, sensor) in self.sensors.iter().enumerate() {
            if !sensor.address.is_unicast() {
                log::warn!(
                    "Sensor {sensor} uses a reserved Modbus address and will likely not answer"
                );
            }
            if self.sensors[..index]
                .iter()
                .any(|other| other.address == sensor.address)
            {
                log::warn!(
                    "Address {} is registered more than once, the responses will collide on the bus",
                    sensor.address
                );
            }
        }
        Ok(self)
    }
}

/// Loads the registry from `path`, or the built-in one if no path is given.
pub fn load_registry(path: Option<&Path>) -> Result<Registry> {
    let Some(path) = path else {
        log::debug!("Using the built-in sensor registry");
        return Ok(Registry::builtin());
    };
    log::debug!("Loading sensor registry from {path:?}");
    let file = File::open(path).with_context(|| format!("Cannot open config file {path:?}"))?;
    let registry: Registry = serde_yaml::from_reader(file)
        .with_context(|| format!("Invalid sensor registry in {path:?}"))?;
    registry.validate()
}
