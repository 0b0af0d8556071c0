//! Instance planner: matches desired slots to existing instances.
//!
//! For one instance group the planner:
//!
//! 1. keeps only existing instances whose zone the group still uses
//! 2. matches each desired slot to one of them (requested index, then same
//!    zone, then lowest index)
//! 3. assigns indices, never reusing one held by any existing instance
//! 4. creates new instances for unmatched slots
//! 5. turns every unmatched existing instance into an obsolete plan
//! 6. elects a single bootstrap instance among the surviving plans
//!
//! The result is deterministic for the same inputs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PlannerError, Result};
use crate::state::{AgentState, InstanceRecord};

use super::desired::DesiredInstance;
use super::instance::{DnsManager, InstanceRepository};
use super::job::InstanceGroup;
use super::plan::InstancePlan;

/// An existing instance record with the zone it was placed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceWithAz {
    /// The persisted record.
    pub record: InstanceRecord,
    /// Availability zone name.
    pub az: Option<String>,
}

impl InstanceWithAz {
    /// Pairs a record with its zone.
    #[must_use]
    pub fn new(record: InstanceRecord, az: Option<&str>) -> Self {
        Self {
            record,
            az: az.map(str::to_string),
        }
    }
}

impl From<InstanceRecord> for InstanceWithAz {
    fn from(record: InstanceRecord) -> Self {
        let az = record.availability_zone.clone();
        Self { record, az }
    }
}

/// Plans the instances of instance groups.
pub struct InstancePlanner<'a> {
    repository: &'a dyn InstanceRepository,
    dns_manager: Arc<dyn DnsManager>,
    recreate_deployment: bool,
    skip_drain: bool,
}

impl<'a> InstancePlanner<'a> {
    /// Creates a planner backed by a repository and a DNS manager.
    #[must_use]
    pub fn new(repository: &'a dyn InstanceRepository, dns_manager: Arc<dyn DnsManager>) -> Self {
        Self {
            repository,
            dns_manager,
            recreate_deployment: false,
            skip_drain: false,
        }
    }

    /// Marks every produced plan as part of a deployment-wide recreate.
    #[must_use]
    pub const fn with_recreate_deployment(mut self, recreate_deployment: bool) -> Self {
        self.recreate_deployment = recreate_deployment;
        self
    }

    /// Skips draining on every produced plan.
    #[must_use]
    pub const fn with_skip_drain(mut self, skip_drain: bool) -> Self {
        self.skip_drain = skip_drain;
        self
    }

    /// Plans the instances of one instance group.
    ///
    /// `existing` holds the group's persisted instances, `states` their last
    /// agent-reported state keyed by uuid. Surviving plans come first in
    /// desired order, followed by obsolete plans in input order. Records of
    /// other groups are skipped.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the instance repository.
    pub fn plan_job_instances(
        &self,
        job: &InstanceGroup,
        desired: Vec<DesiredInstance>,
        existing: &[InstanceWithAz],
        states: &HashMap<String, AgentState>,
    ) -> Result<Vec<InstancePlan>> {
        info!(
            "Planning {} desired instances of {} against {} existing",
            desired.len(),
            job.name,
            existing.len()
        );

        let existing: Vec<InstanceWithAz> = existing
            .iter()
            .filter(|candidate| {
                let own = candidate.record.job == job.name;
                if !own {
                    debug!(
                        "Skipping instance {} which does not belong to {}",
                        candidate.record, job.name
                    );
                }
                own
            })
            .cloned()
            .collect();

        let matches = match_desired(job, &desired, &existing);
        let indices = assign_indices(&desired, &matches, &existing)?;
        let claimed: HashSet<usize> = matches.iter().flatten().copied().collect();

        let mut plans = Vec::with_capacity(desired.len() + existing.len() - claimed.len());

        for ((mut slot, matched), index) in desired.into_iter().zip(matches).zip(indices) {
            slot.index = Some(index);

            let plan = match matched {
                Some(position) => {
                    let record = &existing[position].record;
                    slot.is_existing = true;
                    if slot.az_name() != existing[position].az.as_deref() {
                        slot.az = existing[position]
                            .az
                            .as_deref()
                            .and_then(|az| job.availability_zone(az))
                            .cloned();
                    }

                    let state = states.get(&record.uuid).cloned().unwrap_or_default();
                    debug!("Keeping existing instance {record} as {}/{index}", job.name);
                    let instance = self.repository.fetch_existing(&slot, record, &state)?;
                    InstancePlan::for_existing(
                        record.clone(),
                        slot,
                        instance,
                        Arc::clone(&self.dns_manager),
                    )
                }
                None => {
                    debug!("Creating new instance {}/{index}", job.name);
                    let instance = self.repository.create(&slot, index)?;
                    InstancePlan::for_new(slot, instance, Arc::clone(&self.dns_manager))
                }
            };
            plans.push(self.configure(plan));
        }

        for (position, candidate) in existing.iter().enumerate() {
            if claimed.contains(&position) {
                continue;
            }
            debug!("Existing instance {} is obsolete", candidate.record);
            plans.push(self.obsolete_plan(&candidate.record)?);
        }

        elect_bootstrap(&mut plans);
        Ok(plans)
    }

    /// Plans the teardown of instances whose group no longer exists.
    ///
    /// Records of known groups are skipped. Plans are returned in input order.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the instance repository.
    pub fn plan_obsolete_jobs(
        &self,
        jobs: &[Arc<InstanceGroup>],
        existing: &[InstanceRecord],
    ) -> Result<Vec<InstancePlan>> {
        let known: HashSet<&str> = jobs.iter().map(|job| job.name.as_str()).collect();

        existing
            .iter()
            .filter(|record| !known.contains(record.job.as_str()))
            .map(|record| {
                info!("Instance group {} is gone, {record} is obsolete", record.job);
                self.obsolete_plan(record)
            })
            .collect()
    }

    fn obsolete_plan(&self, record: &InstanceRecord) -> Result<InstancePlan> {
        let instance = self.repository.fetch_obsolete(record)?;
        Ok(self.configure(InstancePlan::for_obsolete(
            record.clone(),
            instance,
            Arc::clone(&self.dns_manager),
        )))
    }

    fn configure(&self, plan: InstancePlan) -> InstancePlan {
        plan.with_skip_drain(self.skip_drain)
            .with_recreate_deployment(self.recreate_deployment)
    }
}

/// Matches each desired slot to the position of an existing instance.
fn match_desired(
    job: &InstanceGroup,
    desired: &[DesiredInstance],
    existing: &[InstanceWithAz],
) -> Vec<Option<usize>> {
    let mut available: Vec<usize> = (0..existing.len())
        .filter(|&position| {
            let candidate = &existing[position];
            let compatible = job.accepts_availability_zone(candidate.az.as_deref());
            if !compatible {
                debug!(
                    "Instance {} is in availability zone {:?} which {} no longer uses",
                    candidate.record,
                    candidate.az,
                    job.name
                );
            }
            compatible
        })
        .collect();
    available.sort_by_key(|&position| existing[position].record.index);

    desired
        .iter()
        .map(|slot| {
            let by_index = slot.index.and_then(|index| {
                available
                    .iter()
                    .position(|&p| existing[p].record.index == index)
            });
            let by_az = || {
                slot.az_name().and_then(|az| {
                    available
                        .iter()
                        .position(|&p| existing[p].az.as_deref() == Some(az))
                })
            };
            let lowest = || (!available.is_empty()).then_some(0);

            by_index
                .or_else(by_az)
                .or_else(lowest)
                .map(|found| available.remove(found))
        })
        .collect()
}

/// Assigns a unique index to every desired slot.
///
/// Matched slots keep their instance's index unless another slot already
/// took it. Every other slot gets its requested index when free, otherwise
/// the lowest index not held by any existing instance.
fn assign_indices(
    desired: &[DesiredInstance],
    matches: &[Option<usize>],
    existing: &[InstanceWithAz],
) -> Result<Vec<u32>> {
    let held: BTreeSet<u32> = existing.iter().map(|e| e.record.index).collect();
    let mut assigned: BTreeSet<u32> = BTreeSet::new();
    let mut indices: Vec<Option<u32>> = vec![None; desired.len()];

    for (slot, matched) in matches.iter().enumerate() {
        let Some(position) = matched else {
            continue;
        };
        let record = &existing[*position].record;
        let index = if assigned.contains(&record.index) {
            warn!(
                "Index {} of {record} is already taken, assigning a new one",
                record.index
            );
            free_index(desired[slot].index, &held, &assigned)?
        } else {
            record.index
        };
        assigned.insert(index);
        indices[slot] = Some(index);
    }

    for (slot, index) in indices.iter_mut().enumerate() {
        if index.is_none() {
            let allocated = free_index(desired[slot].index, &held, &assigned)?;
            assigned.insert(allocated);
            *index = Some(allocated);
        }
    }

    indices
        .into_iter()
        .map(|index| index.ok_or_else(|| PlannerError::internal("unassigned instance index")))
        .collect()
}

/// Returns `requested` if free, otherwise the lowest free index.
fn free_index(
    requested: Option<u32>,
    held: &BTreeSet<u32>,
    assigned: &BTreeSet<u32>,
) -> Result<u32> {
    let is_free = |index: &u32| !held.contains(index) && !assigned.contains(index);

    requested
        .filter(is_free)
        .or_else(|| (0..=u32::MAX).find(is_free))
        .ok_or_else(|| PlannerError::internal("no free instance index left"))
}

/// Elects exactly one bootstrap instance among the surviving plans.
///
/// A sole instance that already is the bootstrap keeps the role; otherwise
/// the lowest index wins.
fn elect_bootstrap(plans: &mut [InstancePlan]) {
    let survivors: Vec<usize> = plans
        .iter()
        .enumerate()
        .filter(|(_, plan)| !plan.is_obsolete())
        .map(|(position, _)| position)
        .collect();

    let current: Vec<usize> = survivors
        .iter()
        .copied()
        .filter(|&position| plans[position].instance().is_bootstrap())
        .collect();

    let chosen = if let [only] = current.as_slice() {
        Some(*only)
    } else {
        survivors.iter().copied().min_by_key(|&position| {
            plans[position]
                .desired_instance()
                .and_then(|desired| desired.index)
        })
    };

    let Some(chosen) = chosen else {
        debug!("No surviving instance, no bootstrap elected");
        return;
    };

    for position in survivors {
        if let Some(desired) = plans[position].desired_instance_mut() {
            desired.bootstrap = position == chosen;
        }
    }
    debug!(
        "Bootstrap instance is {}",
        plans[chosen].instance().name()
    );
}
