//! Worker pool over disjuncts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serval_ir::region::Disjunct;

use super::disjunct::{run_disjunct, DisjunctContext, DisjunctRun};

/// Decide every disjunct on up to `jobs` threads. Once any disjunct has a
/// confirmed counterexample, disjuncts not yet started are skipped.
/// Results come back ordered by disjunct id.
pub(crate) fn run_disjuncts(ctx: &DisjunctContext<'_>, disjuncts: &[Disjunct]) -> Vec<DisjunctRun> {
    let workers = ctx.options.jobs.clamp(1, disjuncts.len().max(1));
    let next = AtomicUsize::new(0);
    let found = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<DisjunctRun>();

    tracing::info!(disjuncts = disjuncts.len(), workers, "deciding disjuncts");
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let found = &found;
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(disjunct) = disjuncts.get(i) else {
                    break;
                };
                let run = if found.load(Ordering::SeqCst) {
                    tracing::debug!(disjunct = disjunct.id, "skipped");
                    DisjunctRun::skipped(ctx, disjunct)
                } else {
                    run_disjunct(ctx, disjunct)
                };
                if run.has_counterexample() {
                    found.store(true, Ordering::SeqCst);
                }
                let _ = tx.send(run);
            });
        }
    });
    drop(tx);

    let mut runs: Vec<DisjunctRun> = rx.into_iter().collect();
    runs.sort_by_key(|r| r.id);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::disjunct::Outcome;
    use crate::pipeline::{Method, PipelineOptions, Strategy};
    use crate::test_support::{analysis_of, atomic_flag_system, ScriptedOracle};
    use serval_oracle::OracleVerdict;

    #[test]
    fn results_are_ordered_whatever_the_worker_count() {
        let (net, analysis) = analysis_of(&atomic_flag_system());
        let oracle = ScriptedOracle::replying(OracleVerdict::Unreachable);
        for jobs in [1, 3] {
            let options = PipelineOptions {
                jobs,
                strategy: Strategy::Oracle,
                ..PipelineOptions::default()
            };
            let ctx = DisjunctContext {
                net: &net,
                analysis: &analysis,
                oracle: &oracle,
                options: &options,
                deadline: None,
            };
            let runs = run_disjuncts(&ctx, &analysis.disjuncts);
            let ids: Vec<usize> = runs.iter().map(|r| r.id).collect();
            let expected: Vec<usize> = analysis.disjuncts.iter().map(|d| d.id).collect();
            assert_eq!(ids, expected);
            assert!(runs
                .iter()
                .all(|r| matches!(r.outcome(Method::Oracle), Some(Outcome::Unreachable))));
        }
    }

    #[test]
    fn no_disjuncts_means_no_runs() {
        let (net, analysis) = analysis_of(&atomic_flag_system());
        let oracle = ScriptedOracle::replying(OracleVerdict::Unreachable);
        let options = PipelineOptions::default();
        let ctx = DisjunctContext {
            net: &net,
            analysis: &analysis,
            oracle: &oracle,
            options: &options,
            deadline: None,
        };
        assert!(run_disjuncts(&ctx, &[]).is_empty());
    }
}
