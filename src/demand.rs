use crate::data::{EquipmentId, EquipmentNeed, Patient, PatientId, ResidualDemand, Schedule};
use itertools::Itertools;
use std::collections::HashMap;

/// Diffs the patients' required session counts against what the schedule
/// actually holds. Only strictly positive remainders are kept; a patient with
/// nothing left is absent from the result.
pub fn residual_demand(schedule: &Schedule, patients: &[Patient]) -> ResidualDemand {
    let scheduled: HashMap<(PatientId, EquipmentId), usize> = schedule
        .occupied()
        .map(|(_, _, booking)| (booking.patient_id, booking.equipment_id))
        .counts();

    let mut residual = ResidualDemand::new();
    for patient in patients {
        let remaining: Vec<EquipmentNeed> = patient
            .needs
            .iter()
            .filter_map(|need| {
                let done = scheduled
                    .get(&(patient.id, need.equipment_id))
                    .copied()
                    .unwrap_or(0) as u32;
                let left = need.sessions.saturating_sub(done);
                (left > 0).then_some(EquipmentNeed {
                    equipment_id: need.equipment_id,
                    sessions: left,
                })
            })
            .collect();
        if !remaining.is_empty() {
            residual.insert(patient.id, remaining);
        }
    }
    residual
}
