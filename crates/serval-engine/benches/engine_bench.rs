use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serval_engine::builder::{self, BuilderOptions};
use serval_engine::explicit::ExplicitOracle;
use serval_engine::pipeline::{PipelineOptions, Strategy};
use serval_engine::reduction;
use serval_ir::ns::NetworkSystem;
use serval_ir::petri::PetriNet;
use serval_ir::region::{SerialAnalysis, SerialOptions};

const MINIMAL: &str = include_str!("../../../models/minimal.json");
const ATOMIC_FLAG: &str = include_str!("../../../models/atomic_flag.json");
const OBSERVE: &str = include_str!("../../../models/observe.ser");

fn bench_options() -> PipelineOptions {
    PipelineOptions {
        max_trace_len: 16,
        max_markings: 2_000,
        ..PipelineOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Individual stages
// ---------------------------------------------------------------------------

fn bench_serial_analysis(c: &mut Criterion) {
    let ns = NetworkSystem::from_json_str(ATOMIC_FLAG).unwrap();
    let net = PetriNet::from_network_system(&ns);
    c.bench_function("engine_serial_analysis_atomic_flag", |b| {
        b.iter(|| SerialAnalysis::compute(black_box(&ns), black_box(&net), &SerialOptions::default()))
    });
}

fn bench_reduce_and_build(c: &mut Criterion) {
    let ns = NetworkSystem::from_json_str(ATOMIC_FLAG).unwrap();
    let net = PetriNet::from_network_system(&ns);
    let analysis = SerialAnalysis::compute(&ns, &net, &SerialOptions::default()).unwrap();
    let disjunct = &analysis.disjuncts[0];
    let query = disjunct.query(&net).unwrap();
    c.bench_function("engine_reduce_and_build_atomic_flag", |b| {
        b.iter(|| {
            let (reduced, _) = reduction::reduce(black_box(&net), &disjunct.targets, true);
            builder::build(&reduced, query.as_ref(), &BuilderOptions::default(), None)
        })
    });
}

// ---------------------------------------------------------------------------
// Full check (parse -> translate -> decide -> certify)
// ---------------------------------------------------------------------------

fn bench_check(c: &mut Criterion, name: &str, source: &str, filename: &str) {
    let options = PipelineOptions {
        strategy: Strategy::Both,
        ..bench_options()
    };
    c.bench_function(name, |b| {
        b.iter(|| {
            let oracle = ExplicitOracle::new(options.explicit_config());
            serval_engine::check_source(black_box(source), filename, &oracle, &options)
        })
    });
}

fn bench_check_minimal(c: &mut Criterion) {
    bench_check(c, "engine_check_minimal", MINIMAL, "minimal.json");
}

fn bench_check_observe(c: &mut Criterion) {
    bench_check(c, "engine_check_observe", OBSERVE, "observe.ser");
}

criterion_group!(
    benches,
    bench_serial_analysis,
    bench_reduce_and_build,
    bench_check_minimal,
    bench_check_observe
);
criterion_main!(benches);
