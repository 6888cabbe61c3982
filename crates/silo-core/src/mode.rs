//! Warehouse deployment modes.
//!
//! The warehouse service runs in one of four modes. Master-ish modes drive
//! the upload scheduler; slave-ish modes host the staging-file parsing
//! pool; embedded mode runs both inside a larger process and reuses the
//! jobs-DB connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Deployment mode for the warehouse service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseMode {
    /// Stand-alone scheduler: routers, workers, ingress.
    Master,
    /// Stand-alone staging-file parser pool.
    Slave,
    /// Both roles in one stand-alone process.
    MasterAndSlave,
    /// Both roles, running inside a host process (default).
    #[default]
    Embedded,
}

impl WarehouseMode {
    /// True when this mode runs the upload scheduler.
    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self, Self::Master | Self::MasterAndSlave | Self::Embedded)
    }

    /// True when this mode runs the staging-file parsing pool.
    #[must_use]
    pub const fn is_slave(self) -> bool {
        matches!(self, Self::Slave | Self::MasterAndSlave | Self::Embedded)
    }

    /// True when the service owns its own HTTP surface (health endpoint).
    #[must_use]
    pub const fn is_standalone(self) -> bool {
        !matches!(self, Self::Embedded)
    }

    /// Canonical lowercase name, as accepted by configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::MasterAndSlave => "master_and_slave",
            Self::Embedded => "embedded",
        }
    }
}

impl fmt::Display for WarehouseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarehouseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "slave" => Ok(Self::Slave),
            "master_and_slave" => Ok(Self::MasterAndSlave),
            "embedded" => Ok(Self::Embedded),
            other => Err(Error::InvalidInput(format!(
                "warehouse mode must be one of master, slave, master_and_slave, embedded (got {other})"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_modes() {
        assert_eq!("master".parse::<WarehouseMode>().unwrap(), WarehouseMode::Master);
        assert_eq!("SLAVE".parse::<WarehouseMode>().unwrap(), WarehouseMode::Slave);
        assert_eq!(
            "master_and_slave".parse::<WarehouseMode>().unwrap(),
            WarehouseMode::MasterAndSlave
        );
        assert_eq!("embedded".parse::<WarehouseMode>().unwrap(), WarehouseMode::Embedded);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!("standalone".parse::<WarehouseMode>().is_err());
    }

    #[test]
    fn master_roles() {
        assert!(WarehouseMode::Master.is_master());
        assert!(!WarehouseMode::Master.is_slave());
        assert!(WarehouseMode::Embedded.is_master());
        assert!(WarehouseMode::Embedded.is_slave());
        assert!(!WarehouseMode::Slave.is_master());
    }

    #[test]
    fn standalone_excludes_embedded() {
        assert!(WarehouseMode::Master.is_standalone());
        assert!(WarehouseMode::Slave.is_standalone());
        assert!(!WarehouseMode::Embedded.is_standalone());
    }
}
