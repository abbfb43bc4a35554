//! N3 patch documents.
//!
//! Two vocabularies are understood. The Solid one describes the patch as a
//! `solid:InsertDeletePatch` with `solid:inserts`, `solid:deletes` and
//! `solid:where` formulas. The older one names the target explicitly,
//! `?patch p:patches <target>`, with `p:insert`, `p:delete` and `p:where`.
use oxrdf::{
    BlankNode,
    GraphName,
};
use oxttl::n3::{
    N3Parser,
    N3Quad,
    N3Term,
};
use url::Url;

use super::{
    pattern,
    PatchDocument,
    PatchOperation,
    TriplePattern,
};
use crate::error::LdpError;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const SOLID_INSERT_DELETE_PATCH: &str = "http://www.w3.org/ns/solid/terms#InsertDeletePatch";
const SOLID_INSERTS: &str = "http://www.w3.org/ns/solid/terms#inserts";
const SOLID_DELETES: &str = "http://www.w3.org/ns/solid/terms#deletes";
const SOLID_WHERE: &str = "http://www.w3.org/ns/solid/terms#where";
const PATCH_PATCHES: &str = "http://example.org/patch#patches";
const PATCH_INSERT: &str = "http://example.org/patch#insert";
const PATCH_DELETE: &str = "http://example.org/patch#delete";
const PATCH_WHERE: &str = "http://example.org/patch#where";

fn is_iri(t: &N3Term, iri: &str) -> bool {
    match t {
        N3Term::NamedNode(n) => n.as_str() == iri,
        _ => false,
    }
}

struct Vocabulary {
    inserts: &'static str,
    deletes: &'static str,
    where_: &'static str,
}

const SOLID: Vocabulary = Vocabulary {
    inserts: SOLID_INSERTS,
    deletes: SOLID_DELETES,
    where_: SOLID_WHERE,
};

const LEGACY: Vocabulary = Vocabulary {
    inserts: PATCH_INSERT,
    deletes: PATCH_DELETE,
    where_: PATCH_WHERE,
};

fn formula(quads: &[N3Quad], patch: &N3Term, predicate: &str, blank_as_variable: bool) -> Result<Option<Vec<TriplePattern>>, LdpError> {
    let name: BlankNode = match quads
        .iter()
        .filter(|q| matches!(q.graph_name, GraphName::DefaultGraph))
        .find(|q| &q.subject == patch && is_iri(&q.predicate, predicate))
    {
        Some(q) => match &q.object {
            N3Term::BlankNode(b) => b.clone(),
            _ => {
                return Err(LdpError::BadRequest(format!("<{}> must be a formula", predicate)));
            },
        },
        None => {
            return Ok(None);
        },
    };
    let graph = GraphName::BlankNode(name);
    let mut patterns = vec!();
    for q in quads.iter().filter(|q| q.graph_name == graph) {
        patterns.push(pattern(q.clone(), blank_as_variable)?);
    }
    Ok(Some(patterns))
}

/// Parses an N3 patch against `target`.
pub fn parse(src: &str, target: &Url) -> Result<PatchDocument, LdpError> {
    let parser = N3Parser::new()
        .with_base_iri(target.as_str())
        .map_err(|e| LdpError::internal("invalid base iri", e))?;
    let mut quads: Vec<N3Quad> = vec!();
    for q in parser.for_slice(src.as_bytes()) {
        match q {
            Ok(v) => quads.push(v),
            Err(e) => {
                return Err(LdpError::BadRequest(format!("Patch document syntax error: {}", e)));
            },
        }
    }

    let top = || quads.iter().filter(|q| matches!(q.graph_name, GraphName::DefaultGraph));
    let solid = top()
        .find(|q| is_iri(&q.predicate, RDF_TYPE) && is_iri(&q.object, SOLID_INSERT_DELETE_PATCH))
        .map(|q| (q.subject.clone(), &SOLID));
    let legacy = || {
        top()
            .find(|q| is_iri(&q.predicate, PATCH_PATCHES) && is_iri(&q.object, target.as_str()))
            .map(|q| (q.subject.clone(), &LEGACY))
    };
    let (subject, vocabulary) = match solid.or_else(legacy) {
        Some(v) => v,
        None => {
            return Err(LdpError::NotFound(format!("No patch for {} found", target)));
        },
    };

    let op = PatchOperation {
        inserts: formula(&quads, &subject, vocabulary.inserts, false)?.unwrap_or_default(),
        deletes: formula(&quads, &subject, vocabulary.deletes, false)?.unwrap_or_default(),
        where_: formula(&quads, &subject, vocabulary.where_, true)?,
    };
    let mut patch = PatchDocument::new(target);
    patch.operations.push(op);
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use oxrdf::Graph;
    use url::Url;

    use super::parse;
    use crate::patch::{
        apply_patch,
        PatternTerm,
    };
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

    #[test]
    fn test_legacy_insert() {
        let src = "@prefix p: <http://example.org/patch#> .\n<#patch> p:patches <https://localhost:8443/doc.ttl> ;\n  p:insert { <d> <e> <f> . } .";
        let p = parse(src, &target()).unwrap();
        assert_eq!(p.operations.len(), 1);
        assert_eq!(p.operations[0].inserts.len(), 1);
        assert!(p.is_insert_only());

        let mut g = graph("<a> <b> <c> .");
        apply_patch(&mut g, &p).unwrap();
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_legacy_other_target() {
        let src = "@prefix p: <http://example.org/patch#> .\n<#patch> p:patches <https://localhost:8443/other.ttl> ;\n  p:insert { <d> <e> <f> . } .";
        assert_eq!(parse(src, &target()).unwrap_err().status(), 404);
    }

    #[test]
    fn test_solid_insert_delete_where() {
        let src = "@prefix solid: <http://www.w3.org/ns/solid/terms#> .\n@prefix ex: <http://example.org/> .\n\
            _:rename a solid:InsertDeletePatch ;\n  solid:where { ?p ex:name \"old\" . } ;\n  solid:deletes { ?p ex:name \"old\" . } ;\n  solid:inserts { ?p ex:name \"new\" . } .";
        let p = parse(src, &target()).unwrap();
        assert_eq!(p.operations[0].deletes[0].subject, PatternTerm::Variable("p".to_string()));

        let mut g = graph("<#me> <http://example.org/name> \"old\" .");
        apply_patch(&mut g, &p).unwrap();
        let expected = graph("<#me> <http://example.org/name> \"new\" .");
        assert_eq!(g.len(), 1);
        for t in expected.iter() {
            assert!(g.contains(t));
        }
    }

    #[test]
    fn test_syntax_error() {
        assert_eq!(parse("<a> <b> {", &target()).unwrap_err().status(), 400);
    }
}
