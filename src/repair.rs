use crate::data::{
    Booking, CaregiverId, EquipmentId, PatientId, RepairAction, RepairOutcome, ResidualDemand,
    Schedule, SchedulingInput, Timeslot,
};
use crate::demand;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Repairs a schedule after some already-scheduled patients became
/// unavailable. `withdrawals` maps each such patient to the slot they must be
/// pulled from.
///
/// For every withdrawal the engine locates the caregiver holding the patient
/// at that slot and runs a first-fit scan over the residual demand pool for a
/// substitute whose required equipment the caregiver is qualified for. On a
/// hit the cell is rewritten in place; on a miss the cell is left as it was
/// and the entry is reported back as unrepaired. The returned residual demand
/// is recomputed from the updated schedule, so displaced sessions reappear as
/// unmet demand.
pub fn repair(
    input: &SchedulingInput,
    mut schedule: Schedule,
    residual_demand: ResidualDemand,
    withdrawals: &BTreeMap<PatientId, Timeslot>,
) -> RepairOutcome {
    let qualifications: HashMap<CaregiverId, HashSet<EquipmentId>> = input
        .caregivers
        .iter()
        .map(|c| (c.id, c.qualified_equipment.iter().copied().collect()))
        .collect();

    // Working copy of the pool; drives first-fit selection only. The final
    // residual demand is recomputed from the schedule afterwards.
    let mut pool = residual_demand;
    let mut repaired = Vec::new();
    let mut unrepaired = BTreeMap::new();
    let no_qualifications = HashSet::new();

    for (&patient_id, &slot) in withdrawals {
        let Some(caregiver_id) = schedule.caregiver_treating(patient_id, slot) else {
            warn!("Patient {patient_id} is not scheduled at slot {slot}; nothing to repair.");
            unrepaired.insert(patient_id, slot);
            continue;
        };
        let allowed = qualifications
            .get(&caregiver_id)
            .unwrap_or(&no_qualifications);

        // First match in pool iteration order; no ranking.
        let substitute = pool.iter().find_map(|(&candidate, needs)| {
            needs
                .iter()
                .find(|n| allowed.contains(&n.equipment_id))
                .map(|n| (candidate, n.equipment_id))
        });

        match substitute {
            Some((substitute_patient, equipment_id)) => {
                info!(
                    "Replacing patient {patient_id} with patient {substitute_patient} at slot {slot} using equipment {equipment_id}"
                );
                schedule.assign(
                    slot,
                    caregiver_id,
                    Booking {
                        patient_id: substitute_patient,
                        equipment_id,
                    },
                );
                consume(&mut pool, substitute_patient, equipment_id);
                repaired.push(RepairAction {
                    slot,
                    caregiver_id,
                    removed_patient: patient_id,
                    substitute_patient,
                    equipment_id,
                });
            }
            None => {
                // Known gap preserved from the original behavior: the stale
                // assignment stays in the cell, but the miss is reported.
                warn!(
                    "No equipment-compatible substitute for patient {patient_id} at slot {slot}; cell left unchanged."
                );
                unrepaired.insert(patient_id, slot);
            }
        }
    }

    let residual_demand = demand::residual_demand(&schedule, &input.patients);
    RepairOutcome {
        schedule,
        residual_demand,
        repaired,
        unrepaired,
    }
}

/// Decrements one session of `equipment` for `patient` in the pool, dropping
/// exhausted needs and fully served patients.
fn consume(pool: &mut ResidualDemand, patient: PatientId, equipment: EquipmentId) {
    if let Some(needs) = pool.get_mut(&patient) {
        if let Some(need) = needs.iter_mut().find(|n| n.equipment_id == equipment) {
            need.sessions = need.sessions.saturating_sub(1);
        }
        needs.retain(|n| n.sessions > 0);
        if needs.is_empty() {
            pool.remove(&patient);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Caregiver, EquipmentNeed, Horizon, Patient};

    fn caregiver(id: CaregiverId, qualified: &[EquipmentId]) -> Caregiver {
        Caregiver {
            id,
            qualified_equipment: qualified.to_vec(),
            unavailable_slots: vec![],
        }
    }

    fn patient(id: PatientId, needs: &[(EquipmentId, u32)]) -> Patient {
        Patient {
            id,
            needs: needs
                .iter()
                .map(|&(equipment_id, sessions)| EquipmentNeed {
                    equipment_id,
                    sessions,
                })
                .collect(),
            unavailable_slots: vec![],
        }
    }

    /// Patient 2 holds slot 8 with caregiver 1 and equipment 10; patient 3
    /// waits in the residual pool needing the same equipment.
    fn fixture() -> (SchedulingInput, Schedule, ResidualDemand) {
        let input = SchedulingInput {
            caregivers: vec![caregiver(1, &[10])],
            patients: vec![patient(2, &[(10, 1)]), patient(3, &[(10, 1)])],
            equipment: vec![10],
            horizon: Horizon {
                first_slot: 8,
                last_slot: 9,
            },
        };
        let mut schedule = Schedule::empty(&input.caregivers, &input.horizon);
        schedule.assign(
            8,
            1,
            Booking {
                patient_id: 2,
                equipment_id: 10,
            },
        );
        let residual = demand::residual_demand(&schedule, &input.patients);
        assert_eq!(residual[&3][0].sessions, 1);
        (input, schedule, residual)
    }

    #[test]
    fn withdrawn_patient_is_replaced_by_a_compatible_one() {
        let (input, schedule, residual) = fixture();
        let withdrawals = BTreeMap::from([(2, 8)]);
        let outcome = repair(&input, schedule, residual, &withdrawals);

        assert_eq!(
            outcome.schedule.cell(8, 1),
            Some(&Booking {
                patient_id: 3,
                equipment_id: 10
            })
        );
        assert_eq!(outcome.repaired.len(), 1);
        let action = outcome.repaired[0];
        assert_eq!(action.removed_patient, 2);
        assert_eq!(action.substitute_patient, 3);
        assert_eq!(action.equipment_id, 10);
        assert!(outcome.unrepaired.is_empty());
        // Patient 3 is served now; patient 2's displaced session reappears.
        assert!(!outcome.residual_demand.contains_key(&3));
        assert_eq!(outcome.residual_demand[&2][0].sessions, 1);
    }

    #[test]
    fn empty_worklist_is_a_no_op() {
        let (input, schedule, residual) = fixture();
        let before_schedule = schedule.clone();
        let before_residual = residual.clone();
        let outcome = repair(&input, schedule, residual, &BTreeMap::new());
        assert_eq!(outcome.schedule, before_schedule);
        assert_eq!(outcome.residual_demand, before_residual);
        assert!(outcome.repaired.is_empty());
        assert!(outcome.unrepaired.is_empty());
    }

    #[test]
    fn incompatible_pool_leaves_the_cell_stale_and_reports_the_miss() {
        // The only waiting patient needs equipment 11, which caregiver 1
        // cannot use.
        let input = SchedulingInput {
            caregivers: vec![caregiver(1, &[10])],
            patients: vec![patient(2, &[(10, 1)]), patient(3, &[(11, 1)])],
            equipment: vec![10, 11],
            horizon: Horizon {
                first_slot: 8,
                last_slot: 9,
            },
        };
        let mut schedule = Schedule::empty(&input.caregivers, &input.horizon);
        schedule.assign(
            8,
            1,
            Booking {
                patient_id: 2,
                equipment_id: 10,
            },
        );
        let residual = demand::residual_demand(&schedule, &input.patients);

        let withdrawals = BTreeMap::from([(2, 8)]);
        let outcome = repair(&input, schedule.clone(), residual, &withdrawals);

        assert_eq!(outcome.schedule, schedule);
        assert!(outcome.repaired.is_empty());
        assert_eq!(outcome.unrepaired, BTreeMap::from([(2, 8)]));
    }

    #[test]
    fn withdrawal_of_an_unscheduled_patient_is_reported_unrepaired() {
        let (input, schedule, residual) = fixture();
        // Patient 2 holds slot 8, not slot 9.
        let withdrawals = BTreeMap::from([(2, 9)]);
        let outcome = repair(&input, schedule.clone(), residual, &withdrawals);
        assert_eq!(outcome.schedule, schedule);
        assert!(outcome.repaired.is_empty());
        assert_eq!(outcome.unrepaired, BTreeMap::from([(2, 9)]));
    }

    #[test]
    fn pool_entries_are_consumed_to_exhaustion() {
        let mut pool = ResidualDemand::from([(
            3,
            vec![
                EquipmentNeed {
                    equipment_id: 10,
                    sessions: 1,
                },
                EquipmentNeed {
                    equipment_id: 11,
                    sessions: 1,
                },
            ],
        )]);
        consume(&mut pool, 3, 10);
        assert_eq!(pool[&3].len(), 1);
        assert_eq!(pool[&3][0].equipment_id, 11);
        consume(&mut pool, 3, 11);
        assert!(!pool.contains_key(&3));
    }

    #[test]
    fn residual_stays_consistent_across_repeated_repairs() {
        // Two slots, two withdrawals handled in one pass: after repair,
        // scheduled counts plus residual counts equal the original quotas
        // for every patient and equipment pair.
        let input = SchedulingInput {
            caregivers: vec![caregiver(1, &[10])],
            patients: vec![
                patient(2, &[(10, 2)]),
                patient(3, &[(10, 1)]),
                patient(4, &[(10, 1)]),
            ],
            equipment: vec![10],
            horizon: Horizon {
                first_slot: 8,
                last_slot: 9,
            },
        };
        let mut schedule = Schedule::empty(&input.caregivers, &input.horizon);
        schedule.assign(
            8,
            1,
            Booking {
                patient_id: 2,
                equipment_id: 10,
            },
        );
        schedule.assign(
            9,
            1,
            Booking {
                patient_id: 2,
                equipment_id: 10,
            },
        );
        let residual = demand::residual_demand(&schedule, &input.patients);

        let withdrawals = BTreeMap::from([(2, 8)]);
        let outcome = repair(&input, schedule, residual, &withdrawals);
        assert_eq!(outcome.repaired.len(), 1);

        for p in &input.patients {
            for need in &p.needs {
                let scheduled = outcome
                    .schedule
                    .occupied()
                    .filter(|(_, _, b)| b.patient_id == p.id && b.equipment_id == need.equipment_id)
                    .count() as u32;
                let left = outcome
                    .residual_demand
                    .get(&p.id)
                    .and_then(|needs| needs.iter().find(|n| n.equipment_id == need.equipment_id))
                    .map_or(0, |n| n.sessions);
                assert_eq!(scheduled + left, need.sessions, "patient {}", p.id);
            }
        }
    }
}
