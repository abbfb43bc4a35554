//! The update subset of SPARQL used to patch documents.
//!
//! Supported operations are `INSERT DATA`, `DELETE DATA`, `DELETE WHERE`,
//! `DELETE {..} INSERT {..} WHERE {..}` and `INSERT {..} WHERE {..}`, with
//! `PREFIX` and `BASE` declarations, several of them separated by `;`.
//! Only the default graph of the target document can be addressed, and a
//! `WHERE` clause must be a basic graph pattern.
use oxrdf::Term;
use spargebra::algebra::GraphPattern;
use spargebra::term::{
    GraphName,
    GraphNamePattern,
    GroundQuad,
    GroundQuadPattern,
    GroundSubject,
    GroundTerm,
    GroundTermPattern,
    NamedNodePattern,
    Quad,
    QuadPattern,
    TermPattern,
};
use spargebra::{
    GraphUpdateOperation,
    Update,
};
use url::Url;

use super::{
    PatchDocument,
    PatchOperation,
    PatternTerm,
    TriplePattern,
};
use crate::error::LdpError;

fn unsupported(what: &str) -> LdpError {
    LdpError::BadRequest(format!("Unsupported SPARQL update: {}", what))
}

fn default_graph(g: &GraphName) -> Result<(), LdpError> {
    match g {
        GraphName::DefaultGraph => Ok(()),
        GraphName::NamedNode(n) => Err(unsupported(&format!("GRAPH {}", n))),
    }
}

fn default_graph_pattern(g: &GraphNamePattern) -> Result<(), LdpError> {
    match g {
        GraphNamePattern::DefaultGraph => Ok(()),
        GraphNamePattern::NamedNode(n) => Err(unsupported(&format!("GRAPH {}", n))),
        GraphNamePattern::Variable(v) => Err(unsupported(&format!("GRAPH ?{}", v.as_str()))),
    }
}

fn term(t: Term) -> PatternTerm {
    PatternTerm::Term(t)
}

fn variable(v: &spargebra::term::Variable) -> PatternTerm {
    PatternTerm::Variable(v.as_str().to_string())
}

fn named_node_pattern(p: &NamedNodePattern) -> PatternTerm {
    match p {
        NamedNodePattern::NamedNode(n) => term(Term::NamedNode(n.clone())),
        NamedNodePattern::Variable(v) => variable(v),
    }
}

// blank nodes of a where clause match like variables
fn term_pattern(t: &TermPattern, blank_as_variable: bool) -> Result<PatternTerm, LdpError> {
    match t {
        TermPattern::NamedNode(n) => Ok(term(Term::NamedNode(n.clone()))),
        TermPattern::Literal(l) => Ok(term(Term::Literal(l.clone()))),
        TermPattern::BlankNode(b) if blank_as_variable => Ok(PatternTerm::Variable(format!("_:{}", b.as_str()))),
        TermPattern::BlankNode(b) => Ok(term(Term::BlankNode(b.clone()))),
        TermPattern::Variable(v) => Ok(variable(v)),
        #[allow(unreachable_patterns)]
        _ => Err(unsupported("quoted triples")),
    }
}

fn ground_term_pattern(t: &GroundTermPattern) -> Result<PatternTerm, LdpError> {
    match t {
        GroundTermPattern::NamedNode(n) => Ok(term(Term::NamedNode(n.clone()))),
        GroundTermPattern::Literal(l) => Ok(term(Term::Literal(l.clone()))),
        GroundTermPattern::Variable(v) => Ok(variable(v)),
        #[allow(unreachable_patterns)]
        _ => Err(unsupported("quoted triples")),
    }
}

fn insert_data(q: &Quad) -> Result<TriplePattern, LdpError> {
    default_graph(&q.graph_name)?;
    Ok(TriplePattern {
        subject: term(q.subject.clone().into()),
        predicate: term(Term::NamedNode(q.predicate.clone())),
        object: term(q.object.clone()),
    })
}

fn delete_data(q: &GroundQuad) -> Result<TriplePattern, LdpError> {
    default_graph(&q.graph_name)?;
    let subject = match &q.subject {
        GroundSubject::NamedNode(n) => Term::NamedNode(n.clone()),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(unsupported("quoted triples"));
        },
    };
    let object = match &q.object {
        GroundTerm::NamedNode(n) => Term::NamedNode(n.clone()),
        GroundTerm::Literal(l) => Term::Literal(l.clone()),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(unsupported("quoted triples"));
        },
    };
    Ok(TriplePattern {
        subject: term(subject),
        predicate: term(Term::NamedNode(q.predicate.clone())),
        object: term(object),
    })
}

fn delete_template(q: &GroundQuadPattern) -> Result<TriplePattern, LdpError> {
    default_graph_pattern(&q.graph_name)?;
    Ok(TriplePattern {
        subject: ground_term_pattern(&q.subject)?,
        predicate: named_node_pattern(&q.predicate),
        object: ground_term_pattern(&q.object)?,
    })
}

fn insert_template(q: &QuadPattern) -> Result<TriplePattern, LdpError> {
    default_graph_pattern(&q.graph_name)?;
    Ok(TriplePattern {
        subject: term_pattern(&q.subject, false)?,
        predicate: named_node_pattern(&q.predicate),
        object: term_pattern(&q.object, false)?,
    })
}

fn where_patterns(pattern: &GraphPattern) -> Result<Vec<TriplePattern>, LdpError> {
    let patterns = match pattern {
        GraphPattern::Bgp { patterns } => patterns,
        _ => {
            return Err(unsupported("WHERE must be a basic graph pattern"));
        },
    };
    let mut out = vec!();
    for p in patterns.iter() {
        out.push(TriplePattern {
            subject: term_pattern(&p.subject, true)?,
            predicate: named_node_pattern(&p.predicate),
            object: term_pattern(&p.object, true)?,
        });
    }
    Ok(out)
}

fn operation(op: &GraphUpdateOperation) -> Result<PatchOperation, LdpError> {
    match op {
        GraphUpdateOperation::InsertData { data } => Ok(PatchOperation {
            inserts: data.iter().map(insert_data).collect::<Result<_, _>>()?,
            ..PatchOperation::default()
        }),
        GraphUpdateOperation::DeleteData { data } => Ok(PatchOperation {
            deletes: data.iter().map(delete_data).collect::<Result<_, _>>()?,
            ..PatchOperation::default()
        }),
        GraphUpdateOperation::DeleteInsert { delete, insert, using, pattern } => {
            if using.is_some() {
                return Err(unsupported("USING"));
            }
            Ok(PatchOperation {
                inserts: insert.iter().map(insert_template).collect::<Result<_, _>>()?,
                deletes: delete.iter().map(delete_template).collect::<Result<_, _>>()?,
                where_: Some(where_patterns(pattern)?),
            })
        },
        GraphUpdateOperation::Load { .. } => Err(unsupported("LOAD")),
        GraphUpdateOperation::Clear { .. } => Err(unsupported("CLEAR")),
        GraphUpdateOperation::Create { .. } => Err(unsupported("CREATE")),
        GraphUpdateOperation::Drop { .. } => Err(unsupported("DROP")),
    }
}

/// Parses a SPARQL Update against `target`, one patch operation per update operation.
pub fn parse(src: &str, target: &Url) -> Result<PatchDocument, LdpError> {
    let update = match Update::parse(src, Some(target.as_str())) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::BadRequest(format!("Patch document syntax error: {}", e)));
        },
    };
    let mut patch = PatchDocument::new(target);
    for op in update.operations.iter() {
        patch.operations.push(operation(op)?);
    }
    if patch.operations.is_empty() {
        return Err(LdpError::BadRequest("Patch document syntax error: no update operation found".to_string()));
    }
    Ok(patch)
}
