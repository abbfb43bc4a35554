//! Graph diffs against stored RDF documents.
//!
//! A patch is a sequence of operations, each carrying triples to delete,
//! triples to insert and an optional `where` pattern binding the variables
//! used in both. Operations apply in order, each one to the result of the
//! previous. A `where` pattern must select exactly one solution, and every
//! triple to delete must be present after substitution. If any operation
//! fails nothing is changed.
pub mod n3;
pub mod sparql;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::debug;
use oxrdf::{
    Graph,
    Term,
    Triple,
};
use oxttl::n3::{
    N3Quad,
    N3Term,
};
use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::rdf::{
    build_triple,
    can_parse,
    parse_graph,
    serialize_graph,
};
use crate::record::{
    self,
    Record,
};

pub const SPARQL_UPDATE: &str = "application/sparql-update";
pub const N3_PATCH: &str = "text/n3";

/// Patch body types this engine understands.
pub const PATCH_TYPES: &[&str] = &[SPARQL_UPDATE, N3_PATCH];

// where clauses are only ever checked for uniqueness
const MAX_SOLUTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternTerm {
    Term(Term),
    Variable(String),
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternTerm::Term(t) => write!(f, "{}", t),
            PatternTerm::Variable(v) => write!(f, "?{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// One delete/insert step of a patch.
#[derive(Debug, Clone, Default)]
pub struct PatchOperation {
    pub inserts: Vec<TriplePattern>,
    pub deletes: Vec<TriplePattern>,
    pub where_: Option<Vec<TriplePattern>>,
}

impl PatchOperation {
    pub fn is_insert_only(&self) -> bool {
        self.deletes.is_empty() && self.where_.is_none()
    }

    /// Access modes needed on the target to apply this operation.
    ///
    /// Deleting or matching reveals graph content, so both need `Read`.
    pub fn required_modes(&self) -> Vec<Mode> {
        if !self.deletes.is_empty() {
            return vec!(Mode::Read, Mode::Write);
        }
        if self.where_.is_some() {
            return vec!(Mode::Read, Mode::Append);
        }
        vec!(Mode::Append)
    }
}

#[derive(Debug, Clone)]
pub struct PatchDocument {
    pub target: Url,
    pub operations: Vec<PatchOperation>,
}

type Bindings = HashMap<String, Term>;

impl PatchDocument {
    pub fn new(target: &Url) -> PatchDocument {
        PatchDocument {
            target: target.clone(),
            operations: vec!(),
        }
    }

    pub fn is_insert_only(&self) -> bool {
        self.operations.iter().all(|o| o.is_insert_only())
    }

    /// Access modes needed on the target to apply every operation.
    pub fn required_modes(&self) -> Vec<Mode> {
        let mut modes: Vec<Mode> = vec!();
        for op in self.operations.iter() {
            for m in op.required_modes() {
                if !modes.contains(&m) {
                    modes.push(m);
                }
            }
        }
        if modes.contains(&Mode::Write) {
            modes.retain(|m| *m != Mode::Append);
        }
        modes
    }
}

/// Pattern term for an N3 term. With `blank_as_variable`, blank nodes match anything.
pub fn pattern_term(t: N3Term, blank_as_variable: bool) -> Result<PatternTerm, LdpError> {
    match t {
        N3Term::NamedNode(n) => Ok(PatternTerm::Term(Term::NamedNode(n))),
        N3Term::Literal(l) => Ok(PatternTerm::Term(Term::Literal(l))),
        N3Term::BlankNode(b) => {
            if blank_as_variable {
                Ok(PatternTerm::Variable(format!("_:{}", b.as_str())))
            } else {
                Ok(PatternTerm::Term(Term::BlankNode(b)))
            }
        },
        N3Term::Variable(v) => Ok(PatternTerm::Variable(v.as_str().to_string())),
        #[allow(unreachable_patterns)]
        _ => Err(LdpError::BadRequest("unsupported term in patch".to_string())),
    }
}

pub fn pattern(q: N3Quad, blank_as_variable: bool) -> Result<TriplePattern, LdpError> {
    Ok(TriplePattern {
        subject: pattern_term(q.subject, blank_as_variable)?,
        predicate: pattern_term(q.predicate, blank_as_variable)?,
        object: pattern_term(q.object, blank_as_variable)?,
    })
}

/// Parses a patch body of the given media type against `target`.
pub fn parse_patch(data: &[u8], target: &Url, content_type: &str) -> Result<PatchDocument, LdpError> {
    let text = match std::str::from_utf8(data) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::BadRequest(format!("Patch document is not valid utf-8: {}", e)));
        },
    };
    match content_type {
        SPARQL_UPDATE => sparql::parse(text, target),
        N3_PATCH => n3::parse(text, target),
        other => Err(LdpError::UnsupportedMediaType(format!("Unsupported patch content type: {}", other))),
    }
}

fn resolve(term: &PatternTerm, bindings: &Bindings) -> Option<Term> {
    match term {
        PatternTerm::Term(t) => Some(t.clone()),
        PatternTerm::Variable(v) => bindings.get(v).cloned(),
    }
}

fn unify(term: &PatternTerm, value: &Term, bindings: &mut Bindings) -> bool {
    match term {
        PatternTerm::Term(t) => t == value,
        PatternTerm::Variable(v) => match bindings.get(v) {
            Some(bound) => bound == value,
            None => {
                bindings.insert(v.clone(), value.clone());
                true
            },
        },
    }
}

fn solve(graph: &Graph, patterns: &[TriplePattern], bindings: Bindings, out: &mut Vec<Bindings>) {
    if out.len() >= MAX_SOLUTIONS {
        return;
    }
    let (first, rest) = match patterns.split_first() {
        Some(v) => v,
        None => {
            out.push(bindings);
            return;
        },
    };
    for t in graph.iter() {
        let t = t.into_owned();
        let mut b = bindings.clone();
        let subject: Term = t.subject.into();
        let predicate = Term::NamedNode(t.predicate);
        if unify(&first.subject, &subject, &mut b) && unify(&first.predicate, &predicate, &mut b) && unify(&first.object, &t.object, &mut b) {
            solve(graph, rest, b, out);
            if out.len() >= MAX_SOLUTIONS {
                return;
            }
        }
    }
}

/// Up to two solutions of the `where` patterns against `graph`.
pub fn solutions(graph: &Graph, patterns: &[TriplePattern]) -> Vec<HashMap<String, Term>> {
    let mut out = vec!();
    solve(graph, patterns, HashMap::new(), &mut out);
    out
}

fn is_ground(patterns: &[TriplePattern]) -> bool {
    patterns.iter().all(|p| {
        [&p.subject, &p.predicate, &p.object]
            .iter()
            .all(|t| matches!(t, PatternTerm::Term(_)))
    })
}

fn instantiate(pattern: &TriplePattern, bindings: &Bindings) -> Result<Triple, LdpError> {
    let mut terms = vec!();
    for t in [&pattern.subject, &pattern.predicate, &pattern.object] {
        match resolve(t, bindings) {
            Some(v) => terms.push(v),
            None => {
                return Err(LdpError::BadRequest(format!("unbound variable {} in patch", t)));
            },
        }
    }
    let object = terms.pop();
    let predicate = terms.pop();
    let subject = terms.pop();
    match (subject, predicate, object) {
        (Some(s), Some(p), Some(o)) => match build_triple(s, p, o) {
            Some(v) => Ok(v),
            None => Err(LdpError::BadRequest(format!("invalid triple in patch: {}", pattern))),
        },
        _ => Err(LdpError::BadRequest(format!("invalid triple in patch: {}", pattern))),
    }
}

fn apply_operation(graph: &mut Graph, op: &PatchOperation) -> Result<(usize, usize), LdpError> {
    let bindings = match &op.where_ {
        Some(w) => {
            let mut found = solutions(graph, w);
            match found.len() {
                0 => {
                    if !op.deletes.is_empty() || !is_ground(&op.inserts) {
                        return Err(LdpError::Conflict("The patch could not be applied: no match for the where clause".to_string()));
                    }
                    HashMap::new()
                },
                1 => found.remove(0),
                _ => {
                    return Err(LdpError::Conflict("The patch could not be applied: the where clause matches more than once".to_string()));
                },
            }
        },
        None => HashMap::new(),
    };

    let mut deletes = vec!();
    for p in op.deletes.iter() {
        let t = instantiate(p, &bindings)?;
        if !graph.contains(&t) {
            return Err(LdpError::Conflict(format!("The patch could not be applied. Could not find to delete: {} .", t)));
        }
        deletes.push(t);
    }
    let mut inserts = vec!();
    for p in op.inserts.iter() {
        inserts.push(instantiate(p, &bindings)?);
    }

    for t in deletes.iter() {
        graph.remove(t);
    }
    for t in inserts.iter() {
        graph.insert(t);
    }
    Ok((deletes.len(), inserts.len()))
}

/// Applies the operations of `patch` to `graph` in order. On error the graph is left untouched.
pub fn apply_patch(graph: &mut Graph, patch: &PatchDocument) -> Result<(), LdpError> {
    let mut patched = graph.clone();
    for (i, op) in patch.operations.iter().enumerate() {
        let (deleted, inserted) = apply_operation(&mut patched, op)?;
        debug!("patched {} operation {}: -{} +{}", patch.target, i, deleted, inserted);
    }
    *graph = patched;
    Ok(())
}

/// Loads the document at `path`, applies `patch` and stores the result atomically.
///
/// A missing document is patched starting from the empty graph.
pub fn patch_file(path: &Path, content_type: &str, patch: &PatchDocument) -> Result<Record, LdpError> {
    if !can_parse(content_type) {
        return Err(LdpError::UnsupportedMediaType(format!("Unsupported content type for patching: {}", content_type)));
    }
    let mut graph = match path.is_file() {
        true => {
            let data = record::read(path)?;
            parse_graph(&data, &patch.target, content_type)?
        },
        false => Graph::new(),
    };
    apply_patch(&mut graph, patch)?;
    let data = serialize_graph(&graph, content_type)?;
    let size = data.len();
    record::put(path, &data[..], size)
}

#[cfg(test)]
mod tests {
    use std::fs::write;

    use oxrdf::Graph;
    use tempfile::tempdir;
    use url::Url;

    use super::{
        apply_patch,
        parse_patch,
        patch_file,
        PatchDocument,
        SPARQL_UPDATE,
    };
    use crate::acl::Mode;
    use crate::rdf::{
        parse_graph,
        TURTLE,
    };

    fn target() -> Url {
        Url::parse("https://localhost:8443/doc.ttl").unwrap()
    }

    fn graph(s: &str) -> Graph {
        parse_graph(s.as_bytes(), &target(), TURTLE).unwrap()
    }

    fn sparql(s: &str) -> PatchDocument {
        parse_patch(s.as_bytes(), &target(), SPARQL_UPDATE).unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut g = graph("<a> <b> <c> .");
        let p = sparql("INSERT DATA { <d> <e> <f> . }");
        apply_patch(&mut g, &p).unwrap();
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(p.required_modes(), vec!(Mode::Append));
    }

    #[test]
    fn test_delete_missing_conflicts() {
        let mut g = graph("<a> <b> <c> .");
        let p = sparql("DELETE DATA { <x> <y> <z> . } ; INSERT DATA { <d> <e> <f> . }");
        assert_eq!(apply_patch(&mut g, &p).unwrap_err().status(), 409);
        assert_eq!(g.len(), 1);
        assert_eq!(p.required_modes(), vec!(Mode::Read, Mode::Write));

        // a failing later operation undoes the earlier ones
        let p = sparql("INSERT DATA { <d> <e> <f> . } ; DELETE DATA { <x> <y> <z> . }");
        assert_eq!(apply_patch(&mut g, &p).unwrap_err().status(), 409);
        assert_eq!(g, graph("<a> <b> <c> ."));
    }

    #[test]
    fn test_operations_apply_in_order() {
        let mut g = graph("<a> <b> <c> .");
        let p = sparql("INSERT DATA { <x> <y> <z> . } ; DELETE DATA { <x> <y> <z> . }");
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g, graph("<a> <b> <c> ."));

        let p = sparql("DELETE DATA { <a> <b> <c> . } ; INSERT DATA { <a> <b> <c> . }");
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g, graph("<a> <b> <c> ."));
    }

    #[test]
    fn test_operation_bindings_are_independent() {
        let mut g = graph("<a> <name> \"A\" . <b> <age> 7 .");
        let p = sparql("DELETE { ?s <name> ?n } INSERT { ?s <label> ?n } WHERE { ?s <name> ?n } ;\n\
            DELETE { ?s <age> ?v } INSERT { ?s <years> ?v } WHERE { ?s <age> ?v }");
        assert_eq!(p.operations.len(), 2);
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g, graph("<a> <label> \"A\" . <b> <years> 7 ."));

        // the second where clause sees the result of the first operation
        let p = sparql("INSERT DATA { <c> <age> 3 . } ; DELETE { ?s <age> ?v } WHERE { ?s <age> ?v }");
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(p.required_modes(), vec!(Mode::Read, Mode::Write));
    }

    #[test]
    fn test_where_binds_variables() {
        let mut g = graph("<a> <name> \"old\" .");
        let p = sparql("DELETE { ?s <name> \"old\" } INSERT { ?s <name> \"new\" } WHERE { ?s <name> \"old\" }");
        apply_patch(&mut g, &p).unwrap();
        let expected = graph("<a> <name> \"new\" .");
        assert_eq!(g.len(), 1);
        for t in expected.iter() {
            assert!(g.contains(t));
        }
    }

    #[test]
    fn test_where_ambiguous_and_empty() {
        let mut g = graph("<a> <p> <x> . <b> <p> <x> .");
        let p = sparql("DELETE { ?s <p> <x> } WHERE { ?s <p> <x> }");
        assert_eq!(apply_patch(&mut g, &p).unwrap_err().status(), 409);

        let p = sparql("DELETE { ?s <q> <x> } WHERE { ?s <q> <x> }");
        assert_eq!(apply_patch(&mut g, &p).unwrap_err().status(), 409);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_patch_missing_file() {
        let d = tempdir().unwrap();
        let path = d.path().join("doc.ttl");
        let p = sparql("INSERT DATA { <a> <b> <c> . }");
        patch_file(&path, TURTLE, &p).unwrap();
        let p = sparql("INSERT DATA { <d> <e> <f> . }");
        patch_file(&path, TURTLE, &p).unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(parse_graph(&data, &target(), TURTLE).unwrap().len(), 2);
    }

    #[test]
    fn test_patch_unsupported_target() {
        let d = tempdir().unwrap();
        let path = d.path().join("doc.txt");
        write(&path, "hello").unwrap();
        let p = sparql("INSERT DATA { <a> <b> <c> . }");
        assert_eq!(patch_file(&path, "text/plain", &p).unwrap_err().status(), 415);
        assert_eq!(parse_patch(b"x", &target(), "text/plain").unwrap_err().status(), 415);
    }
}
