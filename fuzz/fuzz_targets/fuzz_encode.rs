#![no_main]
use libfuzzer_sys::fuzz_target;

use serval_ir::ns::NetworkSystem;
use serval_ir::petri::PetriNet;
use serval_ir::region::{SerialAnalysis, SerialOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(ns) = NetworkSystem::from_json_str(s) else {
        return;
    };
    let net = PetriNet::from_network_system(&ns);
    let options = SerialOptions {
        max_conjuncts: 64,
        ..SerialOptions::default()
    };
    let Ok(analysis) = SerialAnalysis::compute(&ns, &net, &options) else {
        return;
    };
    for disjunct in &analysis.disjuncts {
        if let Ok(Some(query)) = disjunct.query(&net) {
            // Encoding only; no solver is run.
            let _ = serval_oracle::smpt::encode(&net, &query);
        }
    }
});
