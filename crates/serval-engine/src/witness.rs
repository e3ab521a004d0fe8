//! Turning a firing sequence into a confirmed counterexample.
//!
//! Traces come from the builder or from an oracle and always refer to a
//! reduced net. They are replayed here on the unreduced net before being
//! reported.

use thiserror::Error;

use serval_ir::petri::{FiringError, PetriNet, TransitionId};
use serval_ir::presburger::PresburgerError;
use serval_ir::region::{Disjunct, SerialAnalysis};
use serval_ir::vector::SparseVector;
use serval_proof_kernel::{completed_pairs, events_of, TraceCertificate};

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("step {step} of the witness cannot fire: {source}")]
    Illegal {
        step: usize,
        #[source]
        source: FiringError,
    },
    #[error("witness ends with requests still in flight")]
    InFlight,
    #[error("witness final marking does not lie in disjunct {disjunct}")]
    NotWitnessed { disjunct: usize },
    #[error("witness outcome is produced by a serial execution")]
    Serializable,
    #[error("witness could not be evaluated: {0}")]
    Presburger(#[from] PresburgerError),
}

/// Replay `trace` on the unreduced `net` and confirm it witnesses
/// `disjunct` with an outcome no serial execution produces.
pub fn confirm(
    net: &PetriNet,
    analysis: &SerialAnalysis,
    disjunct: &Disjunct,
    trace: &[TransitionId],
) -> Result<TraceCertificate, WitnessError> {
    let end = net
        .replay(trace)
        .map_err(|(step, source)| WitnessError::Illegal { step, source })?;
    if net.in_flight_places().any(|p| end.counters.get(p.id) > 0) {
        return Err(WitnessError::InFlight);
    }
    if !disjunct.is_witnessed_by(net, &end.counters)? {
        return Err(WitnessError::NotWitnessed {
            disjunct: disjunct.id,
        });
    }
    let finished: SparseVector = net
        .completed_places()
        .map(|p| (p.id, end.counters.get(p.id)))
        .filter(|(_, n)| *n > 0)
        .collect();
    if analysis.automaton.can_produce(&finished) {
        return Err(WitnessError::Serializable);
    }
    Ok(TraceCertificate {
        disjunct: disjunct.id,
        transitions: trace.to_vec(),
        events: events_of(net, trace),
        completed: completed_pairs(net, &end.counters),
    })
}
