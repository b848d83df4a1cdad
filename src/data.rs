use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Type aliases for clarity
pub type CaregiverId = u32;
pub type PatientId = u32;
pub type EquipmentId = u32;
pub type Timeslot = u32;

/// A caregiver with their equipment qualifications and scheduling constraints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Caregiver {
    pub id: CaregiverId,
    pub qualified_equipment: Vec<EquipmentId>,
    #[serde(default)]
    pub unavailable_slots: Vec<Timeslot>,
}

/// One equipment requirement of a patient: which equipment and how many sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentNeed {
    pub equipment_id: EquipmentId,
    pub sessions: u32,
}

/// A patient to be scheduled, with their treatment quotas and constraints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub needs: Vec<EquipmentNeed>,
    #[serde(default)]
    pub unavailable_slots: Vec<Timeslot>,
}

/// The scheduling horizon: a contiguous, inclusive range of timeslots
/// (e.g. hourly slots 8..=17). Passed explicitly so several horizons can
/// coexist in one process.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Horizon {
    pub first_slot: Timeslot,
    pub last_slot: Timeslot,
}

impl Horizon {
    pub fn slots(&self) -> impl Iterator<Item = Timeslot> + use<> {
        self.first_slot..=self.last_slot
    }

    pub fn contains(&self, slot: Timeslot) -> bool {
        slot >= self.first_slot && slot <= self.last_slot
    }

    pub fn len(&self) -> usize {
        (self.last_slot.saturating_sub(self.first_slot) as usize) + 1
    }
}

/// The complete input for one solve.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingInput {
    pub caregivers: Vec<Caregiver>,
    pub patients: Vec<Patient>,
    pub equipment: Vec<EquipmentId>,
    pub horizon: Horizon,
}

impl SchedulingInput {
    /// Sum of all required sessions over every patient.
    pub fn total_demand(&self) -> u32 {
        self.patients
            .iter()
            .flat_map(|p| p.needs.iter())
            .map(|n| n.sessions)
            .sum()
    }
}

/// An occupied schedule cell: which patient is treated and with what equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub patient_id: PatientId,
    pub equipment_id: EquipmentId,
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patient {} on equipment {}",
            self.patient_id, self.equipment_id
        )
    }
}

/// The solved timetable: every (timeslot, caregiver) cell over the horizon,
/// empty or holding one booking. Ordered maps keep iteration deterministic,
/// which the repair engine's first-fit scan relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Schedule {
    cells: BTreeMap<Timeslot, BTreeMap<CaregiverId, Option<Booking>>>,
}

impl Schedule {
    /// An all-empty schedule covering every caregiver at every slot.
    pub fn empty(caregivers: &[Caregiver], horizon: &Horizon) -> Self {
        let cells = horizon
            .slots()
            .map(|t| (t, caregivers.iter().map(|c| (c.id, None)).collect()))
            .collect();
        Schedule { cells }
    }

    pub fn assign(&mut self, slot: Timeslot, caregiver: CaregiverId, booking: Booking) {
        self.cells
            .entry(slot)
            .or_default()
            .insert(caregiver, Some(booking));
    }

    pub fn cell(&self, slot: Timeslot, caregiver: CaregiverId) -> Option<&Booking> {
        self.cells
            .get(&slot)
            .and_then(|row| row.get(&caregiver))
            .and_then(|cell| cell.as_ref())
    }

    /// All occupied cells in (slot, caregiver) order.
    pub fn occupied(&self) -> impl Iterator<Item = (Timeslot, CaregiverId, &Booking)> {
        self.cells.iter().flat_map(|(&t, row)| {
            row.iter()
                .filter_map(move |(&c, cell)| cell.as_ref().map(|b| (t, c, b)))
        })
    }

    /// The caregiver treating `patient` at `slot`, if any.
    pub fn caregiver_treating(&self, patient: PatientId, slot: Timeslot) -> Option<CaregiverId> {
        let row = self.cells.get(&slot)?;
        row.iter()
            .find(|(_, cell)| matches!(cell, Some(b) if b.patient_id == patient))
            .map(|(&c, _)| c)
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }
}

/// What the solve failed to satisfy: per patient, the equipment needs with a
/// strictly positive remaining session count.
pub type ResidualDemand = BTreeMap<PatientId, Vec<EquipmentNeed>>;

/// Which model produced the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SolveStatus {
    /// Phase 1: all constraints held, objective minimized.
    Optimal,
    /// Phase 2: demand relaxed to an upper bound, continuity dropped.
    BestEffort,
    /// Neither phase produced a solution; the schedule is all-empty.
    Infeasible,
}

/// The final output of a solve.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingOutput {
    pub schedule: Schedule,
    pub residual_demand: ResidualDemand,
    pub status: SolveStatus,
    /// Solver report when no schedule could be produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// A repair request: the original solve input (for quotas and qualifications),
/// the schedule and residual demand being repaired, and the worklist of
/// newly unavailable patients keyed by the slot they must be pulled from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    pub input: SchedulingInput,
    pub schedule: Schedule,
    pub residual_demand: ResidualDemand,
    pub withdrawals: BTreeMap<PatientId, Timeslot>,
}

/// One successful substitution performed by the repair engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAction {
    pub slot: Timeslot,
    pub caregiver_id: CaregiverId,
    pub removed_patient: PatientId,
    pub substitute_patient: PatientId,
    pub equipment_id: EquipmentId,
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {}: caregiver {} swaps patient {} for patient {} (equipment {})",
            self.slot,
            self.caregiver_id,
            self.removed_patient,
            self.substitute_patient,
            self.equipment_id
        )
    }
}

/// The result of a repair pass. `repaired` is the consumed part of the
/// worklist; `unrepaired` is what could not be substituted, and for those
/// entries the schedule cell is left as it was.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub schedule: Schedule,
    pub residual_demand: ResidualDemand,
    pub repaired: Vec<RepairAction>,
    pub unrepaired: BTreeMap<PatientId, Timeslot>,
}
