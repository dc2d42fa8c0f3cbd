//! Core types for the fleetcast scheduling system.
//!
//! This module defines the shared vocabulary used throughout fleetcast for
//! identifying schedulable entities, cadences, and downstream dependencies.
//! These are the core domain concepts that the scheduler and gateway agree on.
//!
//! # Key Types
//!
//! - [`EntityId`]: Opaque identifier for one tracked group or asset
//! - [`Cadence`]: One of the two named periodic schedules (visible/silent)
//! - [`Dependency`]: A downstream service with its own circuit and rate limit
//!
//! # Examples
//!
//! ```rust
//! use fleetcast::types::{Cadence, Dependency, EntityId};
//!
//! let entity = EntityId::from("group:84112");
//! let key = (entity.clone(), Cadence::Visible);
//!
//! assert_eq!(entity.as_str(), "group:84112");
//! assert_eq!(Cadence::Visible.to_string(), "visible");
//! assert_eq!(Dependency::Store.to_string(), "store");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for one schedulable entity (a chat group or an asset).
///
/// The scheduler never inspects the contents; collaborators supply whatever
/// stable key their backing store rows and chat targets use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Delivery target for a messaging-provider send (chat/group identifier).
///
/// Kept distinct from [`EntityId`]: an entity keys the schedule, a target
/// addresses the messaging provider. For group updates the two usually carry
/// the same underlying id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One of the two named periodic schedules driven by the coordinator.
///
/// Each cadence has its own interval: visible updates are infrequent and
/// user-facing, silent refreshes are frequent and internal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Infrequent, user-facing location messages pushed to chat groups.
    Visible,
    /// Frequent, internal refresh of the shared asset table.
    Silent,
}

impl Cadence {
    pub const ALL: [Cadence; 2] = [Cadence::Visible, Cadence::Silent];
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => write!(f, "visible"),
            Self::Silent => write!(f, "silent"),
        }
    }
}

/// A downstream service the gateway fronts.
///
/// Each dependency gets its own circuit breaker and token bucket so a
/// degraded messaging provider never blocks backend reads and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    /// The spreadsheet-backed data store.
    Store,
    /// The chat messaging provider.
    Messenger,
    /// The reverse-geocoding provider.
    Geocoder,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Messenger => write!(f, "messenger"),
            Self::Geocoder => write!(f, "geocoder"),
        }
    }
}
