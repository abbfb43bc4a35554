//! RDF codec seam: parse and serialize graphs per media type.
use oxrdf::{
    BlankNode,
    Graph,
    GraphName,
    NamedNode,
    Subject,
    Term,
    SubjectRef,
    TermRef,
    Triple,
    TripleRef,
};
use oxrdf::vocab::xsd;
use oxttl::n3::{
    N3Parser,
    N3Term,
};
use oxttl::{
    NTriplesParser,
    NTriplesSerializer,
    TurtleParser,
    TurtleSerializer,
};
use url::Url;

use crate::error::LdpError;

pub const TURTLE: &str = "text/turtle";
pub const N3: &str = "text/n3";
pub const N_TRIPLES: &str = "application/n-triples";

const RDF_TYPES: &[&str] = &[
    TURTLE,
    N3,
    N_TRIPLES,
    "application/x-turtle",
    "application/n3",
    "application/nquads",
    "application/n-quads",
    "application/rdf+xml",
    "application/ld+json",
    "text/html",
    "application/xhtml+xml",
];

/// Types this server can both parse and produce.
pub const NEGOTIABLE: &[&str] = &[TURTLE, N_TRIPLES, N3];

// Declared in turtle output when the graph uses them.
const PREFIXES: &[(&str, &str)] = &[
    ("acl", "http://www.w3.org/ns/auth/acl#"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("ldp", "http://www.w3.org/ns/ldp#"),
    ("posix", "http://www.w3.org/ns/posix/stat#"),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("solid", "http://www.w3.org/ns/solid/terms#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

pub fn is_rdf(content_type: &str) -> bool {
    RDF_TYPES.contains(&content_type)
}

pub fn can_parse(content_type: &str) -> bool {
    NEGOTIABLE.contains(&content_type) || content_type == "application/x-turtle"
}

pub fn term_to_subject(t: Term) -> Option<Subject> {
    match t {
        Term::NamedNode(n) => Some(Subject::NamedNode(n)),
        Term::BlankNode(b) => Some(Subject::BlankNode(b)),
        _ => None,
    }
}

/// Concrete term for an N3 term; variables and quoted triples have none.
pub fn n3_to_term(t: N3Term) -> Option<Term> {
    match t {
        N3Term::NamedNode(n) => Some(Term::NamedNode(n)),
        N3Term::BlankNode(b) => Some(Term::BlankNode(b)),
        N3Term::Literal(l) => Some(Term::Literal(l)),
        _ => None,
    }
}

pub fn build_triple(subject: Term, predicate: Term, object: Term) -> Option<Triple> {
    let s = term_to_subject(subject)?;
    let p: NamedNode = match predicate {
        Term::NamedNode(n) => n,
        _ => {
            return None;
        },
    };
    Some(Triple::new(s, p, object))
}

pub fn formula_name(t: &N3Term) -> Option<BlankNode> {
    match t {
        N3Term::BlankNode(b) => Some(b.clone()),
        _ => None,
    }
}

pub fn in_default_graph(g: &GraphName) -> bool {
    matches!(g, GraphName::DefaultGraph)
}

fn syntax_error(e: impl std::fmt::Display) -> LdpError {
    LdpError::BadRequest(format!("RDF syntax error: {}", e))
}

/// Parses a document of `content_type`, resolving relative IRIs against `base`.
pub fn parse_graph(data: &[u8], base: &Url, content_type: &str) -> Result<Graph, LdpError> {
    let mut graph = Graph::new();
    match content_type {
        TURTLE | "application/x-turtle" => {
            let parser = TurtleParser::new()
                .with_base_iri(base.as_str())
                .map_err(|e| LdpError::internal("invalid base iri", e))?;
            for t in parser.for_slice(data) {
                let t = t.map_err(syntax_error)?;
                graph.insert(&t);
            }
        },
        N_TRIPLES => {
            for t in NTriplesParser::new().for_slice(data) {
                let t = t.map_err(syntax_error)?;
                graph.insert(&t);
            }
        },
        N3 => {
            let parser = N3Parser::new()
                .with_base_iri(base.as_str())
                .map_err(|e| LdpError::internal("invalid base iri", e))?;
            let mut quads = vec!();
            for q in parser.for_slice(data) {
                quads.push(q.map_err(syntax_error)?);
            }
            // statements about formulas are not part of the asserted graph
            let formulas: Vec<BlankNode> = quads
                .iter()
                .filter_map(|q| match &q.graph_name {
                    GraphName::BlankNode(b) => Some(b.clone()),
                    _ => None,
                })
                .collect();
            let is_formula = |t: &N3Term| match formula_name(t) {
                Some(b) => formulas.contains(&b),
                None => false,
            };
            for q in quads {
                if !in_default_graph(&q.graph_name) || is_formula(&q.subject) || is_formula(&q.object) {
                    continue;
                }
                let triple = match (n3_to_term(q.subject), n3_to_term(q.predicate), n3_to_term(q.object)) {
                    (Some(s), Some(p), Some(o)) => build_triple(s, p, o),
                    _ => None,
                };
                if let Some(t) = triple {
                    graph.insert(&t);
                }
            }
        },
        other => {
            return Err(LdpError::UnsupportedMediaType(format!("cannot parse {} as RDF", other)));
        },
    }
    Ok(graph)
}

fn uses_namespace(t: &TripleRef<'_>, namespace: &str) -> bool {
    let subject = match t.subject {
        SubjectRef::NamedNode(n) => n.as_str().starts_with(namespace),
        _ => false,
    };
    let object = match t.object {
        TermRef::NamedNode(n) => n.as_str().starts_with(namespace),
        // plain and language tagged strings are written without a datatype
        TermRef::Literal(l) => l.language().is_none() && l.datatype() != xsd::STRING && l.datatype().as_str().starts_with(namespace),
        _ => false,
    };
    subject || object || t.predicate.as_str().starts_with(namespace)
}

fn write_error(e: std::io::Error) -> LdpError {
    LdpError::internal("cannot serialize graph", e)
}

/// Serializes `graph` as `content_type`, with triples in a stable order.
///
/// N3 documents are written in the turtle subset of N3.
pub fn serialize_graph(graph: &Graph, content_type: &str) -> Result<Vec<u8>, LdpError> {
    let mut triples: Vec<TripleRef<'_>> = graph.iter().collect();
    triples.sort_by_cached_key(|t| (t.subject.to_string(), t.predicate.to_string(), t.object.to_string()));
    match content_type {
        N_TRIPLES => {
            let mut writer = NTriplesSerializer::new().for_writer(Vec::new());
            for t in triples {
                writer.serialize_triple(t).map_err(write_error)?;
            }
            Ok(writer.finish())
        },
        TURTLE | N3 | "application/x-turtle" => {
            let mut serializer = TurtleSerializer::new();
            for (name, namespace) in PREFIXES.iter() {
                if triples.iter().any(|t| uses_namespace(t, namespace)) {
                    serializer = serializer
                        .with_prefix(*name, *namespace)
                        .map_err(|e| LdpError::internal("invalid prefix", e))?;
                }
            }
            let mut writer = serializer.for_writer(Vec::new());
            for t in triples {
                writer.serialize_triple(t).map_err(write_error)?;
            }
            writer.finish().map_err(write_error)
        },
        other => Err(LdpError::NotAcceptable(format!("cannot serialize RDF as {}", other))),
    }
}

fn parse_accept(accept: &str) -> Vec<(String, f32)> {
    let mut ranges: Vec<(String, f32)> = vec!();
    for part in accept.split(',') {
        let mut fields = part.split(';');
        let range = match fields.next() {
            Some(v) => v.trim().to_lowercase(),
            None => continue,
        };
        if range.is_empty() {
            continue;
        }
        let mut q: f32 = 1.0;
        for f in fields {
            let f = f.trim();
            if let Some(v) = f.strip_prefix("q=") {
                q = v.trim().parse().unwrap_or(0.0);
            }
        }
        if q > 0.0 {
            ranges.push((range, q));
        }
    }
    ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranges
}

/// Picks the first of `available` the `Accept` header allows, in preference order.
pub fn negotiate(accept: Option<&str>, available: &[&str]) -> Option<String> {
    let accept = match accept {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            return available.first().map(|s| s.to_string());
        },
    };
    for (range, _) in parse_accept(accept) {
        if range == "*/*" {
            return available.first().map(|s| s.to_string());
        }
        if let Some(prefix) = range.strip_suffix("/*") {
            if let Some(v) = available.iter().find(|t| t.split('/').next() == Some(prefix)) {
                return Some(v.to_string());
            }
            continue;
        }
        if let Some(v) = available.iter().find(|t| **t == range) {
            return Some(v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{
        negotiate,
        parse_graph,
        serialize_graph,
        N3,
        N_TRIPLES,
        TURTLE,
    };

    #[test]
    fn test_parse_turtle_relative() {
        let base = Url::parse("https://localhost:8443/doc.ttl").unwrap();
        let g = parse_graph(b"@prefix ex: <http://example.org/> .\n<#a> ex:b <c> , <d> .", &base, TURTLE).unwrap();
        assert_eq!(g.len(), 2);
        let s = String::from_utf8(serialize_graph(&g, N_TRIPLES).unwrap()).unwrap();
        assert!(s.contains("<https://localhost:8443/doc.ttl#a> <http://example.org/b> <https://localhost:8443/c> ."));
    }

    #[test]
    fn test_turtle_uses_prefixes() {
        let base = Url::parse("https://localhost:8443/").unwrap();
        let src = "<> a <http://www.w3.org/ns/ldp#BasicContainer> ; <http://www.w3.org/ns/ldp#contains> <doc.ttl> .";
        let g = parse_graph(src.as_bytes(), &base, TURTLE).unwrap();
        let s = String::from_utf8(serialize_graph(&g, TURTLE).unwrap()).unwrap();
        assert!(s.starts_with("@prefix ldp: <http://www.w3.org/ns/ldp#> .\n"), "{}", s);
        assert!(s.contains("a ldp:BasicContainer"), "{}", s);
        assert!(!s.contains("foaf:"));
        assert_eq!(parse_graph(s.as_bytes(), &base, TURTLE).unwrap(), g);

        let n3 = serialize_graph(&g, N3).unwrap();
        assert_eq!(parse_graph(&n3, &base, N3).unwrap(), g);
        assert_eq!(serialize_graph(&g, "application/ld+json").unwrap_err().status(), 406);
    }

    #[test]
    fn test_reparse_serialized() {
        let base = Url::parse("https://localhost:8443/doc").unwrap();
        let g = parse_graph(b"<a> <b> \"x\"@en .\n_:n <b> 4 .", &base, TURTLE).unwrap();
        let out = serialize_graph(&g, N_TRIPLES).unwrap();
        let again = parse_graph(&out, &base, N_TRIPLES).unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_parse_n3_skips_formulas() {
        let base = Url::parse("https://localhost:8443/doc.n3").unwrap();
        let g = parse_graph(b"<a> <b> { <c> <d> <e> } .\n<f> <g> <h> .", &base, N3).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_syntax_error() {
        let base = Url::parse("https://localhost:8443/doc").unwrap();
        let e = parse_graph(b"<a> <b> .", &base, TURTLE).unwrap_err();
        assert_eq!(e.status(), 400);
        let e = parse_graph(b"", &base, "application/ld+json").unwrap_err();
        assert_eq!(e.status(), 415);
    }

    #[test]
    fn test_negotiate() {
        let avail = [TURTLE, N_TRIPLES, N3];
        assert_eq!(negotiate(None, &avail).unwrap(), TURTLE);
        assert_eq!(negotiate(Some("application/n-triples"), &avail).unwrap(), N_TRIPLES);
        assert_eq!(negotiate(Some("text/html;q=0.9, text/*;q=0.5"), &avail).unwrap(), TURTLE);
        assert_eq!(negotiate(Some("text/n3;q=0.2, application/n-triples;q=0.8"), &avail).unwrap(), N_TRIPLES);
        assert!(negotiate(Some("image/png"), &avail).is_none());
        assert!(negotiate(Some("text/turtle;q=0"), &[TURTLE]).is_none());
    }
}
