//! Simulation mode derived from the durable flags

use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable flag set when authentication is bypassed
pub const AUTH_BYPASS_KEY: &str = "simulated_auth_bypass";

/// Durable flag naming the simulation flavour ("admin" or "demo")
pub const MODE_TAG_KEY: &str = "simulated_mode";

pub const MODE_TAG_ADMIN: &str = "admin";
pub const MODE_TAG_DEMO: &str = "demo";

/// Where simulated writes land
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// No simulation; readers are empty, writers do nothing
    Off,
    /// Writes go to durable storage and outlive the session
    Elevated,
    /// Writes go to session storage; reads overlay it on durable data
    Session,
}

impl StoreMode {
    /// Resolve the mode from the raw flags. Exactly one mode results.
    pub fn from_flags(auth_bypassed: bool, mode_tag: Option<&str>) -> Self {
        match (auth_bypassed, mode_tag) {
            (true, Some(MODE_TAG_ADMIN)) => StoreMode::Elevated,
            (true, Some(MODE_TAG_DEMO)) => StoreMode::Session,
            _ => StoreMode::Off,
        }
    }

    /// Flag value that selects this mode, `None` for `Off`
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            StoreMode::Off => None,
            StoreMode::Elevated => Some(MODE_TAG_ADMIN),
            StoreMode::Session => Some(MODE_TAG_DEMO),
        }
    }

    pub fn is_active(&self) -> bool {
        *self != StoreMode::Off
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// Active modes can only be left for `Off`; re-entering the current mode
    /// is allowed and changes nothing.
    pub fn can_transition_to(&self, to: StoreMode) -> bool {
        *self == to || *self == StoreMode::Off || to == StoreMode::Off
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Off => write!(f, "off"),
            StoreMode::Elevated => write!(f, "elevated"),
            StoreMode::Session => write!(f, "session"),
        }
    }
}
