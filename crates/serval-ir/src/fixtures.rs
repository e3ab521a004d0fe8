//! Network systems shared by unit tests across modules.

use crate::ns::NetworkSystem;

/// One request type that can observe the intermediate global state of
/// another instance of itself: not serializable.
pub(crate) fn minimal_ns() -> NetworkSystem {
    let mut ns = NetworkSystem::new("G0");
    ns.add_request("R", "L0");
    ns.add_response("L1", "saw_G0");
    ns.add_response("L2", "saw_G1");
    ns.add_transition("L0", "G0", "L3", "G1");
    ns.add_transition("L3", "G1", "L0", "G0");
    ns.add_transition("L0", "G0", "L1", "G0");
    ns.add_transition("L0", "G1", "L2", "G1");
    ns
}

/// Requests answer immediately without touching the global state.
pub(crate) fn trivial_ns() -> NetworkSystem {
    let mut ns = NetworkSystem::new("G0");
    ns.add_request("ping", "P");
    ns.add_request("get", "Q");
    ns.add_response("P", "pong");
    ns.add_response("Q", "value");
    ns
}

/// Atomic increment of a two-valued flag followed by a read: serializable.
pub(crate) fn atomic_flag_ns() -> NetworkSystem {
    let mut ns = NetworkSystem::new("F0");
    ns.add_request("set", "S0");
    ns.add_request("read", "R0");
    ns.add_transition("S0", "F0", "S1", "F1");
    ns.add_transition("S0", "F1", "S1", "F1");
    ns.add_transition("R0", "F0", "R_zero", "F0");
    ns.add_transition("R0", "F1", "R_one", "F1");
    ns.add_response("S1", "done");
    ns.add_response("R_zero", "0");
    ns.add_response("R_one", "1");
    ns
}

/// Two request types sharing a local program that hops between two globals
/// before answering. Every interleaving is also a serial one.
pub(crate) fn crossing_globals_ns() -> NetworkSystem {
    let mut ns = NetworkSystem::new("G0");
    ns.add_request("A", "L0");
    ns.add_request("B", "L0");
    ns.add_response("L1", "r1");
    ns.add_response("L2", "r2");
    ns.add_transition("L0", "G0", "L2", "G1");
    ns.add_transition("L2", "G1", "L1", "G0");
    ns.add_transition("L0", "G0", "L1", "G0");
    ns.add_transition("L0", "G1", "L2", "G1");
    ns
}
