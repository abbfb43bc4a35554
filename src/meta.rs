//! Container listings and `.meta` companion documents.
//!
//! A container is described by a generated graph listing its members with
//! their LDP types and POSIX stat values. If the container directory holds a
//! `.meta` document, its statements are merged into the listing.
use std::path::Path;

use log::warn;
use oxrdf::{
    Graph,
    Literal,
    NamedNode,
    NamedNodeRef,
    Triple,
};
use url::Url;

use crate::error::LdpError;
use crate::mapper::{
    content_type_from_name,
    is_auxiliary,
    ResourceMapper,
    LOCK_DIR,
    META_SUFFIX,
};
use crate::rdf::{
    parse_graph,
    TURTLE,
};
use crate::record::{
    self,
    Stat,
};

const RDF_TYPE: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
const LDP_CONTAINS: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#contains");
const STAT_MTIME: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/posix/stat#mtime");
const STAT_SIZE: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/posix/stat#size");

pub const LDP_RESOURCE: &str = "http://www.w3.org/ns/ldp#Resource";
pub const LDP_CONTAINER: &str = "http://www.w3.org/ns/ldp#Container";
pub const LDP_BASIC_CONTAINER: &str = "http://www.w3.org/ns/ldp#BasicContainer";
const MEDIA_TYPES_NS: &str = "http://www.w3.org/ns/iana/media-types/";

// tempfile spools records next to their final location
const TEMPFILE_PREFIX: &str = ".tmp";

/// Whether a directory entry is exposed as a container member.
pub fn is_listed(name: &str) -> bool {
    !(is_auxiliary(name) || name == LOCK_DIR || name.starts_with(TEMPFILE_PREFIX))
}

fn node(url: &Url) -> Result<NamedNode, LdpError> {
    NamedNode::new(url.as_str()).map_err(|e| LdpError::internal("invalid resource iri", e))
}

fn add_type(graph: &mut Graph, subject: &NamedNode, class: &str) {
    graph.insert(&Triple::new(subject.clone(), RDF_TYPE.into_owned(), NamedNode::new_unchecked(class)));
}

fn add_stats(graph: &mut Graph, subject: &NamedNode, stat: &Stat) {
    graph.insert(&Triple::new(subject.clone(), STAT_MTIME.into_owned(), Literal::from(stat.mtime as i64)));
    graph.insert(&Triple::new(subject.clone(), STAT_SIZE.into_owned(), Literal::from(stat.size as i64)));
}

fn add_container_types(graph: &mut Graph, subject: &NamedNode) {
    add_type(graph, subject, LDP_BASIC_CONTAINER);
    add_type(graph, subject, LDP_CONTAINER);
    add_type(graph, subject, LDP_RESOURCE);
}

/// Statements of the `.meta` document in `dir`, if there is a readable one.
pub fn container_meta(dir: &Path, url: &Url) -> Option<Graph> {
    let path = dir.join(META_SUFFIX);
    if !path.is_file() {
        return None;
    }
    let data = match record::read(&path) {
        Ok(v) => v,
        Err(e) => {
            warn!("cannot read {:?}: {}", path, e);
            return None;
        },
    };
    match parse_graph(&data, url, TURTLE) {
        Ok(g) => Some(g),
        Err(e) => {
            warn!("ignoring unparsable {:?}: {}", path, e);
            None
        },
    }
}

/// Generates the description of the container at `dir`, identified by `url`.
pub fn container_graph(mapper: &ResourceMapper, url: &Url, dir: &Path) -> Result<Graph, LdpError> {
    let hostname = url.host_str().unwrap_or("").to_lowercase();
    let mut graph = Graph::new();
    let subject = node(url)?;
    add_container_types(&mut graph, &subject);
    add_stats(&mut graph, &subject, &record::stat(dir)?);

    for name in record::list(dir)? {
        if !is_listed(&name) {
            continue;
        }
        let path = dir.join(&name);
        let stat = match record::stat(&path) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let member = node(&mapper.map_file_to_url(&path, stat.is_container, &hostname)?)?;
        graph.insert(&Triple::new(subject.clone(), LDP_CONTAINS.into_owned(), member.clone()));
        if stat.is_container {
            add_container_types(&mut graph, &member);
        } else {
            add_type(&mut graph, &member, LDP_RESOURCE);
            let media_type = format!("{}{}#Resource", MEDIA_TYPES_NS, content_type_from_name(&name));
            if let Ok(n) = NamedNode::new(media_type) {
                graph.insert(&Triple::new(member.clone(), RDF_TYPE.into_owned(), n));
            }
        }
        add_stats(&mut graph, &member, &stat);
    }

    if let Some(meta) = container_meta(dir, url) {
        graph.extend(meta.iter());
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::fs::{
        create_dir_all,
        write,
    };

    use oxrdf::{
        NamedNodeRef,
        TripleRef,
    };
    use tempfile::tempdir;
    use url::Url;

    use super::{
        container_graph,
        LDP_BASIC_CONTAINER,
        LDP_CONTAINS,
        RDF_TYPE,
    };
    use crate::mapper::ResourceMapper;

    #[test]
    fn test_listing() {
        let d = tempdir().unwrap();
        create_dir_all(d.path().join("c").join("sub")).unwrap();
        write(d.path().join("c").join("card$.ttl"), "<a> <b> <c> .").unwrap();
        write(d.path().join("c").join("card.acl"), "").unwrap();
        write(d.path().join("c").join(".meta"), "<> <http://purl.org/dc/terms/title> \"Stuff\" .").unwrap();
        let root = Url::parse("https://localhost:8443/").unwrap();
        let m = ResourceMapper::new(&root, d.path(), false);
        let url = Url::parse("https://localhost:8443/c/").unwrap();

        let g = container_graph(&m, &url, &d.path().join("c")).unwrap();
        let c = NamedNodeRef::new_unchecked("https://localhost:8443/c/");
        let card = NamedNodeRef::new_unchecked("https://localhost:8443/c/card");
        let sub = NamedNodeRef::new_unchecked("https://localhost:8443/c/sub/");
        assert!(g.contains(TripleRef::new(c, LDP_CONTAINS, card)));
        assert!(g.contains(TripleRef::new(c, LDP_CONTAINS, sub)));
        assert!(g.contains(TripleRef::new(sub, RDF_TYPE, NamedNodeRef::new_unchecked(LDP_BASIC_CONTAINER))));
        assert_eq!(g.triples_for_predicate(LDP_CONTAINS).count(), 2);
        let title = NamedNodeRef::new_unchecked("http://purl.org/dc/terms/title");
        assert_eq!(g.triples_for_predicate(title).count(), 1);
    }
}
