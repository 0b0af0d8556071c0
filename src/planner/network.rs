//! Network reservations, network plans and network settings.
//!
//! A [`NetworkPlan`] records, per instance slot, whether a reservation is
//! newly desired, already applied or being released. [`NetworkSettings`]
//! is the agent-facing view computed from the surviving reservations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::config::NetworkKind;
use crate::state::{AgentState, NetworkSetting, NetworkSettingsHash};

use super::job::{AvailabilityZone, DefaultNetwork, InstanceGroup, JobNetwork};

/// How a reservation obtains its address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationKind {
    /// Address taken from the group's static IPs.
    Static,
    /// Address assigned by the infrastructure or the network allocator.
    Dynamic,
}

/// A network reservation held or requested by an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    /// Network name.
    pub network: String,
    /// Type of the network.
    pub network_kind: NetworkKind,
    /// Reserved address, if known.
    pub ip: Option<IpAddr>,
    /// How the address is obtained.
    pub kind: ReservationKind,
}

/// Lifecycle tag of a network plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlanTag {
    /// Reservation must be acquired.
    Desired,
    /// Reservation is already applied.
    Existing,
    /// Reservation must be released.
    Obsolete,
}

/// A reservation tied to one instance slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkPlan {
    /// The reservation.
    pub reservation: Reservation,
    /// Lifecycle tag.
    pub tag: NetworkPlanTag,
}

impl Reservation {
    /// Creates a reservation for a static address.
    #[must_use]
    pub fn static_ip(network: &str, network_kind: NetworkKind, ip: IpAddr) -> Self {
        Self {
            network: network.to_string(),
            network_kind,
            ip: Some(ip),
            kind: ReservationKind::Static,
        }
    }

    /// Creates a reservation whose address is assigned later.
    #[must_use]
    pub fn dynamic(network: &str, network_kind: NetworkKind) -> Self {
        Self {
            network: network.to_string(),
            network_kind,
            ip: None,
            kind: ReservationKind::Dynamic,
        }
    }

    /// Returns the reservation with a known address.
    #[must_use]
    pub const fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Returns true if `existing` satisfies this requested reservation.
    ///
    /// Static requests are only satisfied by the same address.
    #[must_use]
    pub fn is_satisfied_by(&self, existing: &Self) -> bool {
        if self.network != existing.network {
            return false;
        }
        match self.kind {
            ReservationKind::Static => self.ip == existing.ip,
            ReservationKind::Dynamic => true,
        }
    }
}

impl NetworkPlan {
    /// Creates a plan for a reservation that must be acquired.
    #[must_use]
    pub const fn desired(reservation: Reservation) -> Self {
        Self {
            reservation,
            tag: NetworkPlanTag::Desired,
        }
    }

    /// Creates a plan for a reservation that is already applied.
    #[must_use]
    pub const fn existing(reservation: Reservation) -> Self {
        Self {
            reservation,
            tag: NetworkPlanTag::Existing,
        }
    }

    /// Creates a plan for a reservation that must be released.
    #[must_use]
    pub const fn obsolete(reservation: Reservation) -> Self {
        Self {
            reservation,
            tag: NetworkPlanTag::Obsolete,
        }
    }

    /// Returns true if the reservation must be acquired.
    #[must_use]
    pub fn is_desired(&self) -> bool {
        self.tag == NetworkPlanTag::Desired
    }

    /// Returns true if the reservation is already applied.
    #[must_use]
    pub fn is_existing(&self) -> bool {
        self.tag == NetworkPlanTag::Existing
    }

    /// Returns true if the reservation must be released.
    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        self.tag == NetworkPlanTag::Obsolete
    }

    /// Marks the reservation as applied.
    pub fn mark_existing(&mut self) {
        self.tag = NetworkPlanTag::Existing;
    }
}

/// Static IPs of one instance group already spoken for during a planning pass.
///
/// Every still-valid static IP held by a surviving instance is claimed up
/// front, so new reservations only draw from addresses nobody keeps.
#[derive(Debug, Default, Clone)]
pub struct StaticIpClaims {
    claimed: HashMap<String, HashSet<IpAddr>>,
    kept: HashMap<String, HashSet<IpAddr>>,
}

impl StaticIpClaims {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the static IPs a surviving instance holds and may keep.
    pub fn hold(&mut self, job: &InstanceGroup, held: &[Reservation]) {
        for reservation in held {
            let Some(ip) = reservation.ip else {
                continue;
            };
            let valid = job
                .network(&reservation.network)
                .is_some_and(|network| network.static_ips.contains(&ip));
            if valid {
                self.claimed
                    .entry(reservation.network.clone())
                    .or_default()
                    .insert(ip);
            }
        }
    }

    /// Returns true if `ip` is claimed on `network`.
    #[must_use]
    pub fn is_claimed(&self, network: &str, ip: IpAddr) -> bool {
        self.claimed
            .get(network)
            .is_some_and(|ips| ips.contains(&ip))
    }

    /// Lets one instance keep `ip`; false if another instance already kept it.
    fn keep(&mut self, network: &str, ip: IpAddr) -> bool {
        if !self.kept.entry(network.to_string()).or_default().insert(ip) {
            return false;
        }
        self.claimed.entry(network.to_string()).or_default().insert(ip);
        true
    }

    /// Takes the first static IP of `network` nobody has claimed.
    fn allocate(&mut self, network: &JobNetwork) -> Option<IpAddr> {
        let ip = network
            .static_ips
            .iter()
            .copied()
            .find(|ip| !self.is_claimed(&network.name, *ip))?;
        self.claimed
            .entry(network.name.clone())
            .or_default()
            .insert(ip);
        Some(ip)
    }
}

/// Builds per-slot network plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkPlanner;

impl NetworkPlanner {
    /// Creates a new network planner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Plans the networks of a surviving slot.
    ///
    /// A held static IP still listed on its network is kept. Otherwise a
    /// static network yields a `desired` plan for the first unclaimed IP,
    /// and a dynamic network reuses any held reservation on it. Held
    /// reservations left over become `obsolete`.
    #[must_use]
    pub fn plan(
        &self,
        job: &InstanceGroup,
        existing_reservations: &[Reservation],
        claims: &mut StaticIpClaims,
    ) -> Vec<NetworkPlan> {
        let mut remaining: Vec<&Reservation> = existing_reservations.iter().collect();
        let mut plans = Vec::with_capacity(job.networks.len());

        for network in &job.networks {
            if network.static_ips.is_empty() {
                let requested = Reservation::dynamic(&network.name, network.kind);
                match remaining.iter().position(|held| requested.is_satisfied_by(held)) {
                    Some(pos) => plans.push(NetworkPlan::existing(remaining.remove(pos).clone())),
                    None => plans.push(NetworkPlan::desired(requested)),
                }
                continue;
            }

            let kept = remaining.iter().position(|held| {
                held.network == network.name
                    && held.ip.is_some_and(|ip| {
                        network.static_ips.contains(&ip) && claims.keep(&network.name, ip)
                    })
            });
            if let Some(pos) = kept {
                plans.push(NetworkPlan::existing(remaining.remove(pos).clone()));
                continue;
            }

            let requested = match claims.allocate(network) {
                Some(ip) => Reservation::static_ip(&network.name, network.kind, ip),
                None => {
                    warn!(
                        "No free static IP left on {} for {}, falling back to dynamic",
                        network.name, job.name
                    );
                    Reservation::dynamic(&network.name, network.kind)
                }
            };
            debug!(
                "Network {} needs a new reservation for {}",
                network.name, job.name
            );
            plans.push(NetworkPlan::desired(requested));
        }

        plans.extend(remaining.into_iter().cloned().map(NetworkPlan::obsolete));
        plans
    }

    /// Plans the networks of an obsolete slot: every held reservation is released.
    #[must_use]
    pub fn plan_obsolete(&self, existing_reservations: &[Reservation]) -> Vec<NetworkPlan> {
        existing_reservations
            .iter()
            .cloned()
            .map(NetworkPlan::obsolete)
            .collect()
    }
}

/// Agent-facing network settings of one instance.
///
/// Computed on demand from an instance plan and never cached.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    job_name: String,
    deployment_name: String,
    default_network: DefaultNetwork,
    reservations: Vec<Reservation>,
    current_state: AgentState,
    availability_zone: Option<AvailabilityZone>,
    index: u32,
    uuid: String,
    dns_domain: String,
}

impl NetworkSettings {
    /// Creates network settings for one instance.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_name: &str,
        deployment_name: &str,
        default_network: DefaultNetwork,
        reservations: Vec<Reservation>,
        current_state: AgentState,
        availability_zone: Option<AvailabilityZone>,
        index: u32,
        uuid: &str,
        dns_domain: &str,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            deployment_name: deployment_name.to_string(),
            default_network,
            reservations,
            current_state,
            availability_zone,
            index,
            uuid: uuid.to_string(),
            dns_domain: dns_domain.to_string(),
        }
    }

    /// Availability zone of the instance.
    #[must_use]
    pub const fn availability_zone(&self) -> Option<&AvailabilityZone> {
        self.availability_zone.as_ref()
    }

    /// Returns true if no reservation survives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Returns the settings keyed by network name.
    #[must_use]
    pub fn to_hash(&self) -> NetworkSettingsHash {
        self.reservations
            .iter()
            .map(|reservation| {
                let setting = NetworkSetting {
                    kind: reservation.network_kind.as_str().to_string(),
                    ip: self.address(reservation),
                    default: self.default_network.purposes_for(&reservation.network),
                    dns_record_name: Some(self.dns_record_name(
                        &self.index.to_string(),
                        &reservation.network,
                    )),
                };
                (reservation.network.clone(), setting)
            })
            .collect()
    }

    /// Returns the `(name, ip)` pairs of every DNS record the instance needs.
    ///
    /// Each addressed network yields an index-based and a uuid-based name.
    #[must_use]
    pub fn dns_record_info(&self) -> Vec<(String, String)> {
        let mut records = Vec::new();
        for reservation in &self.reservations {
            let Some(ip) = self.address(reservation) else {
                continue;
            };
            let ip = ip.to_string();
            for id in [self.index.to_string(), self.uuid.clone()] {
                records.push((self.dns_record_name(&id, &reservation.network), ip.clone()));
            }
        }
        records
    }

    /// Returns the address of the instance on each network.
    ///
    /// Networks without a known address resolve to the DNS record name.
    #[must_use]
    pub fn network_addresses(&self) -> BTreeMap<String, String> {
        self.reservations
            .iter()
            .map(|reservation| {
                let address = self.address(reservation).map_or_else(
                    || self.dns_record_name(&self.index.to_string(), &reservation.network),
                    |ip| ip.to_string(),
                );
                (reservation.network.clone(), address)
            })
            .collect()
    }

    /// Address of a reservation, falling back to what the agent reports on
    /// dynamic networks.
    fn address(&self, reservation: &Reservation) -> Option<IpAddr> {
        reservation.ip.or_else(|| match reservation.network_kind {
            NetworkKind::Dynamic => self.current_state.network_ip(&reservation.network),
            NetworkKind::Manual | NetworkKind::Vip => None,
        })
    }

    fn dns_record_name(&self, id: &str, network: &str) -> String {
        let name = format!(
            "{id}.{}.{network}.{}.{}",
            self.job_name, self.deployment_name, self.dns_domain
        );
        canonical(&name)
    }
}

/// Lowercases a DNS name and replaces underscores with dashes.
fn canonical(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}
