#![no_main]
use libfuzzer_sys::fuzz_target;

use serval_ir::ns::NetworkSystem;
use serval_ir::petri::PetriNet;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(ns) = NetworkSystem::from_json_str(s) {
            let net = PetriNet::from_network_system(&ns);
            let _ = net.initial_global();
            let _ = serde_json::to_string(&ns);
        }
    }
});
