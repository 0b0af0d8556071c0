//! Desired instance slots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::state::InstanceState;

use super::job::{AvailabilityZone, InstanceGroup};

/// Lifecycle state requested for an instance.
///
/// `Restart` and `Recreate` are one-shot markers: the instance ends up
/// started, after being restarted or recreated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VirtualState {
    /// Jobs running.
    Started,
    /// Jobs stopped, VM kept.
    Stopped,
    /// VM deleted, disk kept.
    Detached,
    /// Restart jobs once.
    Restart,
    /// Recreate the VM once.
    Recreate,
}

impl VirtualState {
    /// Returns the administrative state this virtual state converges to.
    #[must_use]
    pub const fn instance_state(self) -> InstanceState {
        match self {
            Self::Started | Self::Restart | Self::Recreate => InstanceState::Started,
            Self::Stopped => InstanceState::Stopped,
            Self::Detached => InstanceState::Detached,
        }
    }
}

impl fmt::Display for VirtualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Detached => "detached",
            Self::Restart => "restart",
            Self::Recreate => "recreate",
        };
        write!(f, "{state}")
    }
}

/// One slot an instance group wants filled.
///
/// The planner assigns `index` and `bootstrap`; callers usually leave them
/// unset, or set `index` to pin a slot to an existing instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredInstance {
    /// Instance group the slot belongs to.
    pub job: Arc<InstanceGroup>,
    /// Requested lifecycle state.
    pub state: Option<VirtualState>,
    /// Owning deployment name.
    pub deployment: String,
    /// Availability zone the slot is placed in.
    pub az: Option<AvailabilityZone>,
    /// Whether the slot is filled by an existing instance.
    pub is_existing: bool,
    /// Index of the slot within the group.
    pub index: Option<u32>,
    /// Whether the slot hosts the group's bootstrap instance.
    pub bootstrap: bool,
}

impl DesiredInstance {
    /// Creates a desired slot with no zone and no index.
    #[must_use]
    pub fn new(job: Arc<InstanceGroup>, state: Option<VirtualState>, deployment: &str) -> Self {
        Self {
            job,
            state,
            deployment: deployment.to_string(),
            az: None,
            is_existing: false,
            index: None,
            bootstrap: false,
        }
    }

    /// Places the slot in an availability zone.
    #[must_use]
    pub fn with_az(mut self, az: AvailabilityZone) -> Self {
        self.az = Some(az);
        self
    }

    /// Pins the slot to an index.
    #[must_use]
    pub const fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Marks the slot as hosting the bootstrap instance.
    pub fn mark_as_bootstrap(&mut self) {
        self.bootstrap = true;
    }

    /// Returns true if the slot hosts the bootstrap instance.
    #[must_use]
    pub const fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    /// Returns the requested lifecycle state, if any.
    #[must_use]
    pub const fn virtual_state(&self) -> Option<VirtualState> {
        self.state
    }

    /// Returns the availability zone name, if any.
    #[must_use]
    pub fn az_name(&self) -> Option<&str> {
        self.az.as_ref().map(|az| az.name.as_str())
    }
}
