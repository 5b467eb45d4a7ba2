use healid_identity::{ConfigError, IdentityConfig};
use std::fmt;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

impl BusKind {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("system") => BusKind::System,
            Some("session") => BusKind::Session,
            Some(other) => {
                tracing::warn!(value = other, "unknown HEALID_BUS, using system bus");
                BusKind::System
            }
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusKind::System => "system",
            BusKind::Session => "session",
        })
    }
}

/// Daemon configuration: the identity subsystem settings plus `HEALID_BUS`.
pub struct Config {
    pub identity: IdentityConfig,
    pub bus: BusKind,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            identity: IdentityConfig::load()?,
            bus: BusKind::parse(std::env::var("HEALID_BUS").ok().as_deref()),
        })
    }
}
