//! End-to-end checks from `.ser` sources to disjuncts.

use serval_ir::lowering::{lower_program, DEFAULT_MAX_STATES};
use serval_ir::petri::{PetriNet, PlaceKind};
use serval_ir::region::{SerialAnalysis, SerialOptions};
use serval_ir::vector::SparseVector;

fn analyse(src: &str, name: &str) -> (PetriNet, SerialAnalysis) {
    let program = serval_dsl::parse(src, name).unwrap();
    let ns = lower_program(&program, DEFAULT_MAX_STATES)
        .unwrap()
        .into_validated()
        .unwrap();
    let net = PetriNet::from_network_system(&ns);
    let analysis = SerialAnalysis::compute(&ns, &net, &SerialOptions::default()).unwrap();
    (net, analysis)
}

fn completed(net: &PetriNet, request: &str, response: &str) -> serval_ir::petri::PlaceId {
    net.place_id(&PlaceKind::Completed {
        request: request.into(),
        response: response.into(),
    })
    .unwrap()
}

#[test]
fn independent_requests_have_no_region() {
    let (_, analysis) = analyse(include_str!("../../../models/coin.ser"), "coin.ser");
    assert_eq!(analysis.disjuncts.len(), 1);
    assert!(analysis.disjuncts[0].is_vacuous());
}

#[test]
fn observing_an_intermediate_write_is_outside_ser() {
    let (net, analysis) = analyse(include_str!("../../../models/observe.ser"), "observe.ser");
    let wrote = completed(&net, "write", "0");
    let saw = completed(&net, "read", "1");
    let outcome: SparseVector = [(wrote, 1), (saw, 1)].into_iter().collect();
    assert!(!analysis.serial_set.contains(&outcome));
    assert!(!analysis.automaton.can_produce(&outcome));
    assert!(analysis
        .disjuncts
        .iter()
        .any(|d| d.is_witnessed_by(&net, &outcome).unwrap()));
}

#[test]
fn lost_update_outcome_is_outside_ser() {
    let (net, analysis) = analyse(
        include_str!("../../../models/lost_update.ser"),
        "lost_update.ser",
    );
    let zero = completed(&net, "flip", "0");
    let twice: SparseVector = [(zero, 2)].into_iter().collect();
    assert!(!analysis.serial_set.contains(&twice));
    assert!(analysis
        .disjuncts
        .iter()
        .any(|d| d.is_witnessed_by(&net, &twice).unwrap()));
}
