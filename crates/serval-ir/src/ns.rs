//! Network system model and JSON loading.
//!
//! A network system (NS) is a server that runs client requests as
//! interleaved sequences of atomic steps over per-request local state and
//! one shared global state.

use std::path::Path;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid network system JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Empty symbol in {context}")]
    EmptySymbol { context: String },
    #[error("Network system declares no requests")]
    NoRequests,
    #[error("Request '{name}' declares entry state '{local}' more than once")]
    DuplicateRequest { name: String, local: String },
}

/// Entry point of one request type: `[name, local]` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct RequestEntry {
    pub name: String,
    pub local: String,
}

/// A local state that completes its request: `[local, name]` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ResponseEntry {
    pub local: String,
    pub name: String,
}

/// One atomic step `(from_local, from_global) -> (to_local, to_global)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    from = "(String, String, String, String)",
    into = "(String, String, String, String)"
)]
pub struct NsTransition {
    pub from_local: String,
    pub from_global: String,
    pub to_local: String,
    pub to_global: String,
}

impl From<(String, String)> for RequestEntry {
    fn from((name, local): (String, String)) -> Self {
        Self { name, local }
    }
}

impl From<RequestEntry> for (String, String) {
    fn from(r: RequestEntry) -> Self {
        (r.name, r.local)
    }
}

impl From<(String, String)> for ResponseEntry {
    fn from((local, name): (String, String)) -> Self {
        Self { local, name }
    }
}

impl From<ResponseEntry> for (String, String) {
    fn from(r: ResponseEntry) -> Self {
        (r.local, r.name)
    }
}

impl From<(String, String, String, String)> for NsTransition {
    fn from((from_local, from_global, to_local, to_global): (String, String, String, String)) -> Self {
        Self {
            from_local,
            from_global,
            to_local,
            to_global,
        }
    }
}

impl From<NsTransition> for (String, String, String, String) {
    fn from(t: NsTransition) -> Self {
        (t.from_local, t.from_global, t.to_local, t.to_global)
    }
}

/// The input model. Immutable once constructed and validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSystem {
    pub initial_global: String,
    pub requests: Vec<RequestEntry>,
    pub responses: Vec<ResponseEntry>,
    pub transitions: Vec<NsTransition>,
}

impl NetworkSystem {
    pub fn new(initial_global: impl Into<String>) -> Self {
        Self {
            initial_global: initial_global.into(),
            requests: Vec::new(),
            responses: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn add_request(&mut self, name: impl Into<String>, local: impl Into<String>) {
        let entry = RequestEntry {
            name: name.into(),
            local: local.into(),
        };
        if !self.requests.contains(&entry) {
            self.requests.push(entry);
        }
    }

    pub fn add_response(&mut self, local: impl Into<String>, name: impl Into<String>) {
        let entry = ResponseEntry {
            local: local.into(),
            name: name.into(),
        };
        if !self.responses.contains(&entry) {
            self.responses.push(entry);
        }
    }

    pub fn add_transition(
        &mut self,
        from_local: impl Into<String>,
        from_global: impl Into<String>,
        to_local: impl Into<String>,
        to_global: impl Into<String>,
    ) {
        let t = NsTransition {
            from_local: from_local.into(),
            from_global: from_global.into(),
            to_local: to_local.into(),
            to_global: to_global.into(),
        };
        if !self.transitions.contains(&t) {
            self.transitions.push(t);
        }
    }

    /// Parse and validate a JSON description.
    pub fn from_json_str(text: &str) -> Result<Self, NsError> {
        let ns: NetworkSystem = serde_json::from_str(text)?;
        ns.into_validated()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, NsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, NsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject malformed input and drop duplicate responses/transitions,
    /// keeping first occurrences.
    pub fn into_validated(self) -> Result<Self, NsError> {
        fn check(symbol: &str, context: impl FnOnce() -> String) -> Result<(), NsError> {
            if symbol.trim().is_empty() {
                Err(NsError::EmptySymbol { context: context() })
            } else {
                Ok(())
            }
        }

        check(&self.initial_global, || "initial_global".into())?;
        if self.requests.is_empty() {
            return Err(NsError::NoRequests);
        }

        let mut seen_requests = IndexSet::new();
        for (i, r) in self.requests.iter().enumerate() {
            check(&r.name, || format!("requests[{i}] name"))?;
            check(&r.local, || format!("requests[{i}] local state"))?;
            if !seen_requests.insert(r) {
                return Err(NsError::DuplicateRequest {
                    name: r.name.clone(),
                    local: r.local.clone(),
                });
            }
        }
        for (i, r) in self.responses.iter().enumerate() {
            check(&r.local, || format!("responses[{i}] local state"))?;
            check(&r.name, || format!("responses[{i}] name"))?;
        }
        for (i, t) in self.transitions.iter().enumerate() {
            check(&t.from_local, || format!("transitions[{i}] source local"))?;
            check(&t.from_global, || format!("transitions[{i}] source global"))?;
            check(&t.to_local, || format!("transitions[{i}] target local"))?;
            check(&t.to_global, || format!("transitions[{i}] target global"))?;
        }

        let responses: IndexSet<ResponseEntry> = self.responses.into_iter().collect();
        let transitions: IndexSet<NsTransition> = self.transitions.into_iter().collect();
        Ok(Self {
            initial_global: self.initial_global,
            requests: self.requests,
            responses: responses.into_iter().collect(),
            transitions: transitions.into_iter().collect(),
        })
    }

    /// Distinct request names in declaration order.
    pub fn request_names(&self) -> IndexSet<&str> {
        self.requests.iter().map(|r| r.name.as_str()).collect()
    }

    /// Distinct response names in declaration order.
    pub fn response_names(&self) -> IndexSet<&str> {
        self.responses.iter().map(|r| r.name.as_str()).collect()
    }

    /// Every local state mentioned anywhere, in first-mention order.
    pub fn locals(&self) -> IndexSet<&str> {
        let mut out = IndexSet::new();
        for r in &self.requests {
            out.insert(r.local.as_str());
        }
        for t in &self.transitions {
            out.insert(t.from_local.as_str());
            out.insert(t.to_local.as_str());
        }
        for r in &self.responses {
            out.insert(r.local.as_str());
        }
        out
    }

    /// Every global state mentioned anywhere, initial first.
    pub fn globals(&self) -> IndexSet<&str> {
        let mut out = IndexSet::new();
        out.insert(self.initial_global.as_str());
        for t in &self.transitions {
            out.insert(t.from_global.as_str());
            out.insert(t.to_global.as_str());
        }
        out
    }

    /// Responses available at `local`.
    pub fn responses_at<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.responses
            .iter()
            .filter(move |r| r.local == local)
            .map(|r| r.name.as_str())
    }

    /// Transitions leaving `(local, global)`.
    pub fn transitions_from<'a>(
        &'a self,
        local: &'a str,
        global: &'a str,
    ) -> impl Iterator<Item = &'a NsTransition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.from_local == local && t.from_global == global)
    }
}
