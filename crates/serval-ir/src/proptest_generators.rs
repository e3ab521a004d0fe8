//! Proptest strategies for generating small network systems.

use proptest::prelude::*;

use crate::ns::NetworkSystem;

/// Strategy for a small, well-formed `NetworkSystem`.
///
/// Generated systems have:
/// - 1–2 request types entering at distinct locals
/// - 2–4 locals named `L0..`, 1–2 globals named `G0..` (`G0` initial)
/// - 0–5 transitions between valid (local, global) pairs
/// - 1–3 responses on valid locals
///
/// They stay small enough for the explicit engine to decide quickly.
pub fn arb_network_system() -> impl Strategy<Value = NetworkSystem> {
    (1..=2usize, 2..=4usize, 1..=2usize, 0..=5usize, 1..=3usize)
        .prop_flat_map(|(nreq, nlocals, nglobals, ntrans, nresp)| {
            let nreq = nreq.min(nlocals);
            let transitions = proptest::collection::vec(
                (0..nlocals, 0..nglobals, 0..nlocals, 0..nglobals),
                ntrans..=ntrans,
            );
            let responses = proptest::collection::vec((0..nlocals, 0..2usize), nresp..=nresp);
            (Just(nreq), transitions, responses)
        })
        .prop_map(|(nreq, transitions, responses)| {
            let mut ns = NetworkSystem::new("G0");
            for r in 0..nreq {
                ns.add_request(format!("req{r}"), format!("L{r}"));
            }
            for (lf, gf, lt, gt) in transitions {
                ns.add_transition(
                    format!("L{lf}"),
                    format!("G{gf}"),
                    format!("L{lt}"),
                    format!("G{gt}"),
                );
            }
            for (local, name) in responses {
                ns.add_response(format!("L{local}"), format!("r{name}"));
            }
            ns
        })
}

/// Strategy for systems where two request types share their entry local
/// and hop between two globals before answering, so serial runs cross
/// globals in both directions.
pub fn arb_shared_entry_system() -> impl Strategy<Value = NetworkSystem> {
    let transition = (0..3usize, 0..2usize, 0..3usize, 0..2usize);
    (
        proptest::collection::vec(transition, 3..=6),
        proptest::collection::vec(1..3usize, 1..=2),
    )
        .prop_map(|(transitions, responding)| {
            let mut ns = NetworkSystem::new("G0");
            ns.add_request("A", "L0");
            ns.add_request("B", "L0");
            for (lf, gf, lt, gt) in transitions {
                ns.add_transition(
                    format!("L{lf}"),
                    format!("G{gf}"),
                    format!("L{lt}"),
                    format!("G{gt}"),
                );
            }
            for local in responding {
                ns.add_response(format!("L{local}"), format!("r{local}"));
            }
            ns
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_systems_are_well_formed(ns in arb_network_system()) {
            prop_assert!(!ns.requests.is_empty());
            prop_assert!(!ns.responses.is_empty());
            prop_assert_eq!(ns.initial_global.as_str(), "G0");
            let validated = ns.clone().into_validated();
            prop_assert!(validated.is_ok());
            prop_assert!(ns.transitions.len() <= 5);
        }

        #[test]
        fn shared_entry_systems_are_well_formed(ns in arb_shared_entry_system()) {
            prop_assert_eq!(ns.requests.len(), 2);
            prop_assert!(ns.requests.iter().all(|r| r.local == "L0"));
            prop_assert!(ns.clone().into_validated().is_ok());
        }
    }
}
