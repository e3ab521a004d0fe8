//! SMPT backend.
//!
//! A query is written as a Tina `.net` file plus a PNML-style `.xml`
//! reachability property, handed to SMPT in a scratch directory, and the
//! solver's stdout is parsed back into a verdict. Divisibility atoms have
//! no direct XML counterpart; each one gets two generator places that can
//! be filled freely, and the atom becomes an equation over them.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use serval_ir::petri::{PetriNet, PlaceId, TransitionId};
use serval_ir::presburger::{Atom, Conjunct, LinExpr, Relation, Var};

use crate::cache::{CacheError, ResultCache};
use crate::oracle::{capped_timeout, OracleError, OracleStats, OracleVerdict, ReachabilityOracle};

pub const WRAPPER_PATH: &str = "./smpt_wrapper.sh";
pub const DEFAULT_METHODS: [&str; 2] = ["STATE-EQUATION", "BMC"];
const NET_NAME: &str = "serval";
const PROPERTY_ID: &str = "serval-reachability";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SmptError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("SMPT scratch file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("SMPT exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unrecognised SMPT output: {excerpt}")]
    MalformedOutput { excerpt: String },
    #[error("SMPT trace refers to unknown transition t{index}")]
    UnknownTransition { index: usize },
    #[error("variable {var} has no place in the net")]
    UnsupportedVar { var: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Settings for the external solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmptConfig {
    /// Program and leading arguments to run instead of the wrapper script
    /// or `python3 -m smpt`.
    pub command: Option<Vec<String>>,
    pub methods: Vec<String>,
    /// Parent directory for per-query scratch directories.
    pub work_dir: Option<PathBuf>,
    /// Solver timeout in seconds; `0` means none.
    pub timeout_secs: u64,
    /// Extra wall-clock time granted before the process is killed.
    pub kill_grace_secs: u64,
    pub use_cache: bool,
    pub cache_dir: PathBuf,
}

impl Default for SmptConfig {
    fn default() -> Self {
        Self {
            command: None,
            methods: DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
            work_dir: None,
            timeout_secs: 0,
            kill_grace_secs: 5,
            use_cache: false,
            cache_dir: PathBuf::from(".serval-cache/smpt"),
        }
    }
}

impl SmptConfig {
    /// Program plus leading arguments.
    fn base_command(&self) -> (String, Vec<String>) {
        if let Some((program, rest)) = self.command.as_deref().and_then(|c| c.split_first()) {
            return (program.clone(), rest.to_vec());
        }
        if Path::new(WRAPPER_PATH).exists() {
            (WRAPPER_PATH.to_string(), Vec::new())
        } else {
            ("python3".to_string(), vec!["-m".into(), "smpt".into()])
        }
    }

    fn args(&self, net_file: &Path, xml_file: &Path) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            net_file.display().to_string(),
            "--xml".to_string(),
            xml_file.display().to_string(),
            "--show-time".to_string(),
            "--show-model".to_string(),
            "--methods".to_string(),
        ];
        args.extend(self.methods.iter().cloned());
        if self.timeout_secs > 0 {
            args.push("--timeout".to_string());
            args.push(self.timeout_secs.to_string());
        }
        args
    }

    fn wall_clock_limit(&self) -> Option<Duration> {
        (self.timeout_secs > 0)
            .then(|| Duration::from_secs(self.timeout_secs.saturating_add(self.kill_grace_secs)))
    }
}

/// A query rendered for SMPT. Position `k` of `transitions` is `tk` in the
/// net text; positions past its end are divisibility generators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedQuery {
    pub net: String,
    pub xml: String,
    pub transitions: Vec<TransitionId>,
    /// Number of divisibility generator pairs appended after them.
    pub generators: usize,
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn place_label(net: &PetriNet, id: PlaceId) -> String {
    format!("p{}_{}", id.0, sanitize(&net.place_name(id)))
}

/// One weighted sum side of an XML comparison.
#[derive(Default)]
struct Side {
    terms: Vec<(String, i64)>,
    constant: i64,
}

impl Side {
    fn render(&self, indent: usize, out: &mut String) {
        let pad = " ".repeat(indent);
        let mut parts: Vec<String> = self
            .terms
            .iter()
            .map(|(place, c)| {
                let tokens = format!("<tokens-count><place>{place}</place></tokens-count>");
                if *c == 1 {
                    tokens
                } else {
                    format!("<integer-mul><integer-constant>{c}</integer-constant>{tokens}</integer-mul>")
                }
            })
            .collect();
        if self.constant != 0 || parts.is_empty() {
            parts.push(format!("<integer-constant>{}</integer-constant>", self.constant));
        }
        if parts.len() == 1 {
            let _ = writeln!(out, "{pad}{}", parts[0]);
        } else {
            let _ = writeln!(out, "{pad}<integer-add>");
            for p in parts {
                let _ = writeln!(out, "{pad}  {p}");
            }
            let _ = writeln!(out, "{pad}</integer-add>");
        }
    }
}

struct Encoder<'a> {
    net: &'a PetriNet,
    present: BTreeSet<PlaceId>,
    /// Generator place pairs, one per divisibility atom.
    generators: Vec<(String, String)>,
}

impl<'a> Encoder<'a> {
    fn new(net: &'a PetriNet) -> Self {
        Encoder {
            net,
            present: net.live_places(),
            generators: Vec::new(),
        }
    }

    /// Split `expr` into `lhs` and `rhs` with only non-negative weights and
    /// `expr = lhs - rhs`. Places absent from the net are always empty.
    fn sides(&self, expr: &LinExpr) -> Result<(Side, Side), SmptError> {
        let mut lhs = Side::default();
        let mut rhs = Side::default();
        for (var, c) in expr.terms() {
            let Var::Place(p) = var else {
                return Err(SmptError::UnsupportedVar {
                    var: var.to_string(),
                });
            };
            if !self.present.contains(&p) {
                continue;
            }
            let label = place_label(self.net, p);
            if c > 0 {
                lhs.terms.push((label, c));
            } else {
                rhs.terms.push((label, c.saturating_neg()));
            }
        }
        let k = expr.constant_term();
        if k >= 0 {
            lhs.constant = k;
        } else {
            rhs.constant = k.saturating_neg();
        }
        Ok((lhs, rhs))
    }

    fn atom(&mut self, atom: &Atom, out: &mut String) -> Result<(), SmptError> {
        let (op, (lhs, rhs)) = match atom.relation {
            Relation::Eq => ("integer-eq", self.sides(&atom.expr)?),
            Relation::Ge => ("integer-ge", self.sides(&atom.expr)?),
            Relation::Div { modulus } => {
                // m | e  iff  e + m*neg = m*pos for some token counts.
                let n = self.generators.len();
                let pos = format!("dpos{n}");
                let neg = format!("dneg{n}");
                let (mut lhs, mut rhs) = self.sides(&atom.expr)?;
                lhs.terms.push((neg.clone(), modulus));
                rhs.terms.push((pos.clone(), modulus));
                self.generators.push((pos, neg));
                ("integer-eq", (lhs, rhs))
            }
        };
        let _ = writeln!(out, "            <{op}>");
        lhs.render(14, out);
        rhs.render(14, out);
        let _ = writeln!(out, "            </{op}>");
        Ok(())
    }
}

/// Render the net and query for SMPT.
pub fn encode(net: &PetriNet, query: &Conjunct) -> Result<EncodedQuery, SmptError> {
    let mut encoder = Encoder::new(net);

    let mut atoms = String::new();
    for atom in query.atoms() {
        encoder.atom(atom, &mut atoms)?;
    }
    if atoms.is_empty() {
        atoms.push_str(
            "            <integer-eq>\n              <integer-constant>0</integer-constant>\n              <integer-constant>0</integer-constant>\n            </integer-eq>\n",
        );
    }
    let xml = format!(
        "<?xml version='1.0' encoding='utf-8'?>\n\
         <property-set>\n  <property>\n    <id>{PROPERTY_ID}</id>\n    \
         <description>serializability disjunct</description>\n    <formula>\n      \
         <exists-path>\n        <finally>\n          <conjunction>\n\
         {atoms}          </conjunction>\n        </finally>\n      </exists-path>\n    \
         </formula>\n  </property>\n</property-set>\n"
    );

    let mut text = String::new();
    let _ = writeln!(text, "net {{{NET_NAME}}}");
    let _ = writeln!(text, "pl {} (1)", place_label(net, net.initial_global()));
    let mut transitions = Vec::with_capacity(net.transitions().len());
    for (k, t) in net.transitions().iter().enumerate() {
        let inputs: Vec<String> = t.inputs().map(|p| place_label(net, p)).collect();
        let outputs: Vec<String> = t.outputs().map(|p| place_label(net, p)).collect();
        let _ = writeln!(
            text,
            "tr t{k} {}-> {}",
            inputs.iter().map(|p| format!("{p} ")).collect::<String>(),
            outputs.join(" ")
        );
        transitions.push(t.id);
    }
    for (i, (pos, neg)) in encoder.generators.iter().enumerate() {
        let k = transitions.len() + 2 * i;
        let _ = writeln!(text, "tr t{k} -> {pos}");
        let _ = writeln!(text, "tr t{} -> {neg}", k + 1);
    }

    Ok(EncodedQuery {
        net: text,
        xml,
        transitions,
        generators: encoder.generators.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SmptAnswer {
    Reachable(Vec<usize>),
    Unreachable,
    Undecided,
}

/// Read the verdict from the `FORMULA` line and, when reachable, the
/// trace from the line following a `[BMC] Trace` or `[PDR] Trace` marker.
pub(crate) fn parse_output(stdout: &str) -> SmptAnswer {
    let verdict = stdout
        .lines()
        .filter(|l| l.trim_start().starts_with("FORMULA"))
        .find_map(|l| {
            l.split_whitespace().find_map(|w| match w {
                "TRUE" => Some(true),
                "FALSE" => Some(false),
                _ => None,
            })
        });
    match verdict {
        Some(true) => SmptAnswer::Reachable(trace_indices(stdout)),
        Some(false) => SmptAnswer::Unreachable,
        None => SmptAnswer::Undecided,
    }
}

fn trace_indices(stdout: &str) -> Vec<usize> {
    let lines: Vec<&str> = stdout.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if !(line.contains("[BMC] Trace") || line.contains("[PDR] Trace")) {
            continue;
        }
        let Some(next) = lines.get(i + 1).map(|l| l.trim()) else {
            continue;
        };
        if next.starts_with('t') {
            return next
                .split_whitespace()
                .filter_map(|w| w.strip_prefix('t').and_then(|n| n.parse().ok()))
                .collect();
        }
    }
    Vec::new()
}

/// SMPT prints a greeting and nothing else when its own timeout fires.
fn looks_like_timeout(status: Option<ExitStatus>, stdout: &str) -> bool {
    let code = status.and_then(|s| s.code());
    (code == Some(1) && stdout.trim() == "# Hello")
        || (stdout.contains("# Hello") && stdout.contains("# Bye bye") && !stdout.contains("FORMULA"))
}

/// Drop the noise Python prints when its stdout closes early.
fn filter_python_cleanup(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|l| {
            !l.contains("Exception ignored in:")
                && !l.contains("BrokenPipeError")
                && !l.contains("<_io.BufferedWriter")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 400;
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

struct ProcessOutput {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
    killed: bool,
}

/// Run `cmd` with output redirected to files in `scratch`, killing it once
/// `limit` has elapsed.
fn run_with_deadline(
    mut cmd: Command,
    program: &str,
    scratch: &Path,
    limit: Option<Duration>,
) -> Result<ProcessOutput, SmptError> {
    let stdout_path = scratch.join("stdout.txt");
    let stderr_path = scratch.join("stderr.txt");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(File::create(&stdout_path)?))
        .stderr(Stdio::from(File::create(&stderr_path)?));
    let mut child = cmd.spawn().map_err(|source| SmptError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let started = Instant::now();
    let mut killed = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if limit.is_some_and(|l| started.elapsed() >= l) {
            // The process may exit between the poll and the kill.
            let _ = child.kill();
            killed = true;
            break child.wait().ok();
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let read = |p: &Path| -> Result<String, SmptError> {
        Ok(String::from_utf8_lossy(&fs::read(p)?).into_owned())
    };
    Ok(ProcessOutput {
        status,
        stdout: read(&stdout_path)?,
        stderr: read(&stderr_path)?,
        killed,
    })
}

/// [`ReachabilityOracle`] backed by an SMPT process per query.
#[derive(Debug)]
pub struct SmptOracle {
    config: SmptConfig,
    cache: Option<ResultCache>,
    calls: AtomicU64,
    timeouts: AtomicU64,
}

impl SmptOracle {
    pub fn new(config: SmptConfig) -> Result<Self, SmptError> {
        let cache = if config.use_cache {
            Some(ResultCache::open(&config.cache_dir)?)
        } else {
            None
        };
        Ok(SmptOracle {
            config,
            cache,
            calls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SmptConfig {
        &self.config
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, SmptError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("serval-smpt-");
        let dir = match &self.config.work_dir {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(fs::canonicalize(parent)?)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// This config with its solver timeout capped at `limit_secs`.
    fn capped(&self, limit_secs: Option<u64>) -> SmptConfig {
        let own = (self.config.timeout_secs > 0).then(|| Duration::from_secs(self.config.timeout_secs));
        SmptConfig {
            timeout_secs: capped_timeout(own, limit_secs).map_or(0, |d| d.as_secs()),
            ..self.config.clone()
        }
    }

    fn solve(&self, encoded: &EncodedQuery, config: &SmptConfig) -> Result<OracleVerdict, SmptError> {
        let scratch = self.scratch_dir()?;
        let net_file = scratch.path().join("model.net");
        let xml_file = scratch.path().join("property.xml");
        fs::write(&net_file, &encoded.net)?;
        fs::write(&xml_file, &encoded.xml)?;

        let (program, mut args) = config.base_command();
        args.extend(config.args(&net_file, &xml_file));
        tracing::info!(program = %program, args = ?args, "invoking SMPT");
        let mut cmd = Command::new(&program);
        cmd.args(&args);

        self.calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let output = run_with_deadline(
            cmd,
            &program,
            scratch.path(),
            config.wall_clock_limit(),
        )?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            killed = output.killed,
            "SMPT finished"
        );

        match parse_output(&output.stdout) {
            SmptAnswer::Unreachable => Ok(OracleVerdict::Unreachable),
            SmptAnswer::Reachable(indices) => {
                let mut trace = Vec::with_capacity(indices.len());
                for index in indices {
                    if let Some(id) = encoded.transitions.get(index) {
                        trace.push(*id);
                    } else if index >= encoded.transitions.len() + 2 * encoded.generators {
                        return Err(SmptError::UnknownTransition { index });
                    }
                }
                Ok(OracleVerdict::Reachable { trace })
            }
            SmptAnswer::Undecided if output.killed || looks_like_timeout(output.status, &output.stdout) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Ok(OracleVerdict::Timeout)
            }
            SmptAnswer::Undecided => match output.status {
                Some(status) if !status.success() => Err(SmptError::Failed {
                    status: status.to_string(),
                    stderr: excerpt(&filter_python_cleanup(&output.stderr)),
                }),
                _ => Err(SmptError::MalformedOutput {
                    excerpt: excerpt(&output.stdout),
                }),
            },
        }
    }
}

impl ReachabilityOracle for SmptOracle {
    fn name(&self) -> &str {
        "smpt"
    }

    fn query(&self, net: &PetriNet, query: &Conjunct) -> Result<OracleVerdict, OracleError> {
        self.query_with_limit(net, query, None)
    }

    fn query_with_limit(
        &self,
        net: &PetriNet,
        query: &Conjunct,
        limit_secs: Option<u64>,
    ) -> Result<OracleVerdict, OracleError> {
        let encoded = encode(net, query)?;
        let key = self
            .cache
            .as_ref()
            .map(|_| ResultCache::key(&encoded.net, &encoded.xml));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(key = %key, "SMPT cache hit");
                return Ok(hit);
            }
        }
        let verdict = self.solve(&encoded, &self.capped(limit_secs))?;
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.put(key, &verdict) {
                tracing::warn!(error = %e, "failed to store SMPT result in cache");
            }
        }
        Ok(verdict)
    }

    fn stats(&self) -> OracleStats {
        OracleStats {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache.as_ref().map_or(0, |c| c.hits()),
            cache_misses: self.cache.as_ref().map_or(0, |c| c.misses()),
        }
    }
}
