use crate::data::{
    Booking, CaregiverId, EquipmentId, PatientId, Schedule, SchedulingInput, SchedulingOutput,
    SolveStatus, Timeslot,
};
use crate::demand;
use good_lp::variable;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
};
use log::{info, trace, warn};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// One decision variable key: caregiver c treats patient p at slot t with
/// equipment e.
type AssignmentKey = (CaregiverId, PatientId, Timeslot, EquipmentId);

/// The two model configurations. They are built independently: the optimal
/// model carries exact demand satisfaction and the continuity family; the
/// best-effort model relaxes demand to an upper bound, drops continuity, and
/// maximizes served sessions instead of minimizing appointment times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelPhase {
    Optimal,
    BestEffort,
}

/// Solves the caregiver scheduling problem with the HiGHS MILP solver.
///
/// Phase 1 asks for an optimal schedule under all constraint families. Any
/// non-optimal solver outcome falls back to phase 2, a maximal-feasible model
/// that serves as much demand as it can. If that also fails the output is an
/// all-empty schedule with a diagnostic. `Err` is reserved for inputs the
/// model cannot even be built from, such as a reversed horizon.
pub fn solve(input: &SchedulingInput) -> Result<SchedulingOutput, String> {
    let start_time = Instant::now();
    if input.horizon.first_slot > input.horizon.last_slot {
        return Err(format!(
            "invalid horizon: first slot {} is after last slot {}",
            input.horizon.first_slot, input.horizon.last_slot
        ));
    }
    info!(
        "Setting up ILP model with {} caregivers, {} patients, {} equipment types, and {} timeslots...",
        input.caregivers.len(),
        input.patients.len(),
        input.equipment.len(),
        input.horizon.len()
    );

    let output = match solve_phase(input, ModelPhase::Optimal) {
        Ok(assignments) => {
            info!("Optimal solution found in {:.2?}", start_time.elapsed());
            build_output(input, &assignments, SolveStatus::Optimal, None)
        }
        Err(reason) => {
            warn!(
                "No optimal solution ({reason}); retrying with relaxed best-effort model to maximize treated patients."
            );
            match solve_phase(input, ModelPhase::BestEffort) {
                Ok(assignments) => {
                    info!("Best-effort solution found in {:.2?}", start_time.elapsed());
                    build_output(input, &assignments, SolveStatus::BestEffort, None)
                }
                Err(fallback_reason) => {
                    warn!("No feasible schedule exists: {fallback_reason}");
                    build_output(input, &[], SolveStatus::Infeasible, Some(fallback_reason))
                }
            }
        }
    };
    Ok(output)
}

/// Builds and solves one model configuration, returning the keys of the
/// variables the solver set to 1.
fn solve_phase(input: &SchedulingInput, phase: ModelPhase) -> Result<Vec<AssignmentKey>, String> {
    // Full variable space, no pruning; the constraint families carry all
    // feasibility rules.
    let keys: Vec<AssignmentKey> = input
        .caregivers
        .iter()
        .flat_map(|c| {
            input.patients.iter().flat_map(move |p| {
                input
                    .horizon
                    .slots()
                    .flat_map(move |t| input.equipment.iter().map(move |&e| (c.id, p.id, t, e)))
            })
        })
        .collect();
    trace!(
        "Phase {:?}: generated {} assignment variables.",
        phase,
        keys.len()
    );

    if keys.is_empty() {
        if input.total_demand() == 0 {
            return Ok(Vec::new());
        }
        return Err(
            "empty decision space: no caregiver/patient/equipment/timeslot combinations exist"
                .to_string(),
        );
    }

    // lookups
    let patient_needs: HashMap<PatientId, HashMap<EquipmentId, u32>> = input
        .patients
        .iter()
        .map(|p| {
            let needs = p
                .needs
                .iter()
                .map(|n| (n.equipment_id, n.sessions))
                .collect();
            (p.id, needs)
        })
        .collect();
    let qualifications: HashMap<CaregiverId, HashSet<EquipmentId>> = input
        .caregivers
        .iter()
        .map(|c| (c.id, c.qualified_equipment.iter().copied().collect()))
        .collect();

    // decision map
    let mut problem = ProblemVariables::new();
    let mut vars: HashMap<AssignmentKey, Variable> = HashMap::new();
    let vars_vec = problem.add_vector(variable().binary(), keys.len());
    for (key, var) in keys.iter().zip(vars_vec) {
        vars.insert(*key, var);
    }

    // Objective: earlier appointments first (optimal), or as many served
    // sessions as possible (best-effort).
    let objective: Expression = match phase {
        ModelPhase::Optimal => vars
            .iter()
            .map(|(&(_, _, t, _), &var)| f64::from(t) * Expression::from(var))
            .sum(),
        ModelPhase::BestEffort => vars.values().map(|&var| var).sum(),
    };

    let unsolved = match phase {
        ModelPhase::Optimal => problem.minimise(objective),
        ModelPhase::BestEffort => problem.maximise(objective),
    };
    let mut model = unsolved
        .using(default_solver)
        .set_option("threads", 1) // limit to 1 thread for reproducibility
        .set_option("random_seed", 1234) //set seed for reproducibility
        .set_option("log_to_console", "false");

    // Family 1: a caregiver treats at most one patient per slot.
    info!("Adding 'caregiver exclusivity' constraints...");
    for c in &input.caregivers {
        for t in input.horizon.slots() {
            let busy: Expression = vars
                .iter()
                .filter(|&(&(c_id, _, slot, _), _)| c_id == c.id && slot == t)
                .map(|(_, &var)| var)
                .sum();
            model.add_constraint(constraint!(busy <= 1));
        }
    }

    // Family 2: a patient attends at most one appointment per slot.
    info!("Adding 'patient exclusivity' constraints...");
    for p in &input.patients {
        for t in input.horizon.slots() {
            let attending: Expression = vars
                .iter()
                .filter(|&(&(_, p_id, slot, _), _)| p_id == p.id && slot == t)
                .map(|(_, &var)| var)
                .sum();
            model.add_constraint(constraint!(attending <= 1));
        }
    }

    // Families 3 and 4: nothing is assigned inside an unavailability window.
    info!("Adding availability constraints...");
    for c in &input.caregivers {
        for &t in &c.unavailable_slots {
            for (_, &var) in vars
                .iter()
                .filter(|&(&(c_id, _, slot, _), _)| c_id == c.id && slot == t)
            {
                model.add_constraint(constraint!(var == 0));
            }
        }
    }
    for p in &input.patients {
        for &t in &p.unavailable_slots {
            for (_, &var) in vars
                .iter()
                .filter(|&(&(_, p_id, slot, _), _)| p_id == p.id && slot == t)
            {
                model.add_constraint(constraint!(var == 0));
            }
        }
    }

    // Family 5: one unit of each equipment type per slot.
    info!("Adding 'equipment exclusivity' constraints...");
    for &e in &input.equipment {
        for t in input.horizon.slots() {
            let in_use: Expression = vars
                .iter()
                .filter(|&(&(_, _, slot, e_id), _)| e_id == e && slot == t)
                .map(|(_, &var)| var)
                .sum();
            model.add_constraint(constraint!(in_use <= 1));
        }
    }

    // Family 6: each patient receives the required number of sessions per
    // equipment type. Exact in the optimal phase, an upper bound otherwise.
    info!("Adding 'demand satisfaction' constraints...");
    for p in &input.patients {
        for need in &p.needs {
            let served: Expression = vars
                .iter()
                .filter(|&(&(_, p_id, _, e_id), _)| p_id == p.id && e_id == need.equipment_id)
                .map(|(_, &var)| var)
                .sum();
            let sessions = f64::from(need.sessions);
            match phase {
                ModelPhase::Optimal => {
                    model.add_constraint(constraint!(served == sessions));
                }
                ModelPhase::BestEffort => {
                    model.add_constraint(constraint!(served <= sessions));
                }
            }
        }
    }

    // Family 7: caregivers use only equipment they are qualified for.
    info!("Adding qualification constraints...");
    for c in &input.caregivers {
        let allowed = &qualifications[&c.id];
        for (_, &var) in vars
            .iter()
            .filter(|&(&(c_id, _, _, e_id), _)| c_id == c.id && !allowed.contains(&e_id))
        {
            model.add_constraint(constraint!(var == 0));
        }
    }

    // Family 8: patients are treated only with equipment they need.
    for p in &input.patients {
        let required = &patient_needs[&p.id];
        for (_, &var) in vars
            .iter()
            .filter(|&(&(_, p_id, _, e_id), _)| p_id == p.id && !required.contains_key(&e_id))
        {
            model.add_constraint(constraint!(var == 0));
        }
    }

    // Family 9 (optimal phase only): once a multi-session bundle starts it
    // must continue under the same caregiver. Encoded as suffix sums >= 1
    // over every clean run of k consecutive slots. This encoding can make
    // the optimal model infeasible on its own, which is exactly what the
    // best-effort fallback exists for.
    if phase == ModelPhase::Optimal {
        info!("Adding 'same caregiver continuity' constraints...");
        for p in &input.patients {
            for need in &p.needs {
                let k = need.sessions;
                if k <= 1 {
                    continue;
                }
                for c in &input.caregivers {
                    for t in input.horizon.slots() {
                        if t + k - 1 > input.horizon.last_slot {
                            break;
                        }
                        for i in 0..k {
                            let run: Expression = (i..k)
                                .map(|j| vars[&(c.id, p.id, t + j, need.equipment_id)])
                                .sum();
                            model.add_constraint(constraint!(run >= 1));
                        }
                    }
                }
            }
        }
    }

    info!("Starting ILP solver (phase {:?})...", phase);
    let solution = model
        .solve()
        .map_err(|e| format!("solver reported no solution: {e}"))?;

    let assignments: Vec<AssignmentKey> = vars
        .iter()
        .filter(|&(_, &var)| solution.value(var) > 0.9)
        .map(|(&key, _)| key)
        .collect();
    Ok(assignments)
}

/// Writes the solved variables into the timetable and diffs the result
/// against the original quotas. Trusts the solver: no re-validation of the
/// exclusivity families happens here.
fn build_output(
    input: &SchedulingInput,
    assignments: &[AssignmentKey],
    status: SolveStatus,
    diagnostic: Option<String>,
) -> SchedulingOutput {
    let mut schedule = Schedule::empty(&input.caregivers, &input.horizon);
    for &(c, p, t, e) in assignments {
        trace!("Caregiver {c} cares for patient {p} at slot {t} with equipment {e}");
        schedule.assign(
            t,
            c,
            Booking {
                patient_id: p,
                equipment_id: e,
            },
        );
    }
    let residual_demand = demand::residual_demand(&schedule, &input.patients);
    SchedulingOutput {
        schedule,
        residual_demand,
        status,
        diagnostic,
    }
}
