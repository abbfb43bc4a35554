//! Web access control: which agent may do what to a resource.
//!
//! The ACL governing a resource is the closest existing `.acl` document,
//! starting with the resource's own and walking up the container hierarchy.
//! A resource's own ACL contributes the rules granting access to it; an
//! ancestor's ACL contributes only its rules marked inheritable for that
//! ancestor container.
use std::fmt;

use log::{
    debug,
    warn,
};
use oxrdf::{
    Graph,
    NamedNodeRef,
    SubjectRef,
    TermRef,
};
use url::Url;

use crate::error::LdpError;
use crate::mapper::{
    acl_subject,
    acl_url,
    is_acl_url,
    media_type,
    MapOptions,
    ResourceMapper,
};
use crate::rdf::{
    can_parse,
    parse_graph,
    TURTLE,
};
use crate::record;
use crate::remote::Fetcher;

const ACL_NS: &str = "http://www.w3.org/ns/auth/acl#";

const ACL_ACCESS_TO: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#accessTo");
const ACL_DEFAULT: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#default");
const ACL_DEFAULT_FOR_NEW: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#defaultForNew");
const ACL_AGENT: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#agent");
const ACL_AGENT_CLASS: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#agentClass");
const ACL_AGENT_GROUP: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#agentGroup");
const ACL_ORIGIN: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#origin");
const ACL_MODE: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/ns/auth/acl#mode");
const ACL_AUTHENTICATED_AGENT: &str = "http://www.w3.org/ns/auth/acl#AuthenticatedAgent";
const FOAF_AGENT: &str = "http://xmlns.com/foaf/0.1/Agent";
const VCARD_HAS_MEMBER: NamedNodeRef = NamedNodeRef::new_unchecked("http://www.w3.org/2006/vcard/ns#hasMember");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
    Control,
}

impl Mode {
    fn from_iri(iri: &str) -> Option<Mode> {
        match iri.strip_prefix(ACL_NS)? {
            "Read" => Some(Mode::Read),
            "Write" => Some(Mode::Write),
            "Append" => Some(Mode::Append),
            "Control" => Some(Mode::Control),
            _ => None,
        }
    }

    /// Whether holding `granted` entitles to this mode.
    pub fn granted_by(self, granted: Mode) -> bool {
        match (self, granted) {
            (a, b) if a == b => true,
            (Mode::Append, Mode::Write) => true,
            (_, Mode::Control) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Mode::Read => "Read",
            Mode::Write => "Write",
            Mode::Append => "Append",
            Mode::Control => "Control",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentClass {
    Anyone,
    Authenticated,
    Group(Url),
}

/// One authorization statement of an ACL document.
#[derive(Debug, Clone)]
pub struct AuthorizationRule {
    pub access_to: Vec<Url>,
    pub defaults: Vec<Url>,
    pub agents: Vec<String>,
    pub agent_classes: Vec<AgentClass>,
    pub origins: Vec<String>,
    pub modes: Vec<Mode>,
}

/// Rules that apply to a resource, tagged by where they came from.
#[derive(Debug)]
pub enum AclLayer {
    /// The resource's own ACL, rules granting access to it.
    Local {
        acl: Url,
        rules: Vec<AuthorizationRule>,
    },
    /// An ancestor container's ACL, rules inheritable from that container.
    Inherited {
        acl: Url,
        container: Url,
        rules: Vec<AuthorizationRule>,
    },
}

impl AclLayer {
    pub fn acl(&self) -> &Url {
        match self {
            AclLayer::Local { acl, .. } => acl,
            AclLayer::Inherited { acl, .. } => acl,
        }
    }

    pub fn rules(&self) -> &[AuthorizationRule] {
        match self {
            AclLayer::Local { rules, .. } => rules,
            AclLayer::Inherited { rules, .. } => rules,
        }
    }
}

fn iris(graph: &Graph, subject: SubjectRef, predicate: NamedNodeRef) -> Vec<String> {
    graph
        .objects_for_subject_predicate(subject, predicate)
        .filter_map(|o| match o {
            TermRef::NamedNode(n) => Some(n.as_str().to_string()),
            _ => None,
        })
        .collect()
}

fn urls(graph: &Graph, subject: SubjectRef, predicate: NamedNodeRef) -> Vec<Url> {
    iris(graph, subject, predicate)
        .iter()
        .filter_map(|s| Url::parse(s).ok())
        .collect()
}

fn normalize_origin(s: &str) -> String {
    s.trim_end_matches('/').to_lowercase()
}

/// Extracts the authorization rules of a parsed ACL document.
pub fn parse_rules(graph: &Graph) -> Vec<AuthorizationRule> {
    let mut subjects: Vec<SubjectRef> = vec!();
    for t in graph.triples_for_predicate(ACL_MODE) {
        if !subjects.contains(&t.subject) {
            subjects.push(t.subject);
        }
    }

    let mut rules = vec!();
    for s in subjects {
        let mut defaults = urls(graph, s, ACL_DEFAULT);
        defaults.extend(urls(graph, s, ACL_DEFAULT_FOR_NEW));

        let mut agent_classes: Vec<AgentClass> = vec!();
        for c in iris(graph, s, ACL_AGENT_CLASS) {
            let class = match c.as_str() {
                FOAF_AGENT => AgentClass::Anyone,
                ACL_AUTHENTICATED_AGENT => AgentClass::Authenticated,
                other => match Url::parse(other) {
                    Ok(u) => AgentClass::Group(u),
                    Err(_) => continue,
                },
            };
            agent_classes.push(class);
        }
        for g in urls(graph, s, ACL_AGENT_GROUP) {
            agent_classes.push(AgentClass::Group(g));
        }

        rules.push(AuthorizationRule {
            access_to: urls(graph, s, ACL_ACCESS_TO),
            defaults,
            agents: iris(graph, s, ACL_AGENT),
            agent_classes,
            origins: iris(graph, s, ACL_ORIGIN).iter().map(|o| normalize_origin(o)).collect(),
            modes: iris(graph, s, ACL_MODE).iter().filter_map(|m| Mode::from_iri(m)).collect(),
        });
    }
    rules
}

pub struct AclChecker<'a> {
    mapper: &'a ResourceMapper,
    fetcher: &'a dyn Fetcher,
}

impl<'a> AclChecker<'a> {

    pub fn new(mapper: &'a ResourceMapper, fetcher: &'a dyn Fetcher) -> AclChecker<'a> {
        AclChecker {
            mapper,
            fetcher,
        }
    }

    fn load_local(&self, url: &Url) -> Result<Option<(Vec<u8>, String)>, LdpError> {
        let mapping = match self.mapper.map_url_to_file(url, MapOptions::default()) {
            Ok(v) => v,
            Err(LdpError::NotFound(_)) => {
                return Ok(None);
            },
            Err(e) => {
                return Err(e);
            },
        };
        if mapping.is_container {
            return Ok(None);
        }
        let data = record::read(&mapping.path)?;
        Ok(Some((data, mapping.content_type)))
    }

    // An unreadable ACL counts as present with no rules.
    fn load_acl(&self, acl: &Url) -> Result<Option<Vec<AuthorizationRule>>, LdpError> {
        let data = match self.load_local(acl)? {
            Some((data, _)) => data,
            None => {
                return Ok(None);
            },
        };
        match parse_graph(&data, acl, TURTLE) {
            Ok(g) => Ok(Some(parse_rules(&g))),
            Err(e) => {
                warn!("ignoring unparsable acl {}: {}", acl, e);
                Ok(Some(vec!()))
            },
        }
    }

    /// Finds the closest ACL governing `url`.
    ///
    /// Returns `None` if neither the resource nor any ancestor up to the store
    /// root has an ACL document.
    pub fn nearest_acl(&self, url: &Url) -> Result<Option<AclLayer>, LdpError> {
        let acl = acl_url(url)?;
        if let Some(rules) = self.load_acl(&acl)? {
            debug!("using acl {} for {}", acl, url);
            let rules = rules
                .into_iter()
                .filter(|r| r.access_to.contains(url))
                .collect();
            return Ok(Some(AclLayer::Local {
                acl,
                rules,
            }));
        }

        let mut current = url.clone();
        while let Some(container) = self.mapper.parent_container(&current) {
            let acl = acl_url(&container)?;
            if let Some(rules) = self.load_acl(&acl)? {
                debug!("using inherited acl {} for {}", acl, url);
                let rules = rules
                    .into_iter()
                    .filter(|r| r.defaults.contains(&container))
                    .collect();
                return Ok(Some(AclLayer::Inherited {
                    acl,
                    container,
                    rules,
                }));
            }
            current = container;
        }
        Ok(None)
    }

    fn load_group(&self, group: &Url) -> Option<Graph> {
        let mut doc = group.clone();
        doc.set_fragment(None);
        let (data, content_type) = if self.mapper.is_local(&doc) {
            match self.load_local(&doc) {
                Ok(Some(v)) => v,
                Ok(None) => {
                    return None;
                },
                Err(e) => {
                    warn!("cannot load group {}: {}", doc, e);
                    return None;
                },
            }
        } else {
            match self.fetcher.fetch(&doc) {
                Ok(v) => (v.data, v.content_type),
                Err(e) => {
                    warn!("cannot fetch group {}: {}", doc, e);
                    return None;
                },
            }
        };
        let content_type = match media_type(&content_type) {
            Some(v) if can_parse(&v) => v,
            _ => TURTLE.to_string(),
        };
        match parse_graph(&data, &doc, &content_type) {
            Ok(g) => Some(g),
            Err(e) => {
                warn!("cannot parse group {}: {}", doc, e);
                None
            },
        }
    }

    fn in_group(&self, group: &Url, agent: &str) -> bool {
        let graph = match self.load_group(group) {
            Some(v) => v,
            None => {
                return false;
            },
        };
        let members = iris(&graph, NamedNodeRef::new_unchecked(group.as_str()).into(), VCARD_HAS_MEMBER);
        members.iter().any(|m| m == agent)
    }

    fn rule_matches(&self, rule: &AuthorizationRule, agent: Option<&str>, origin: Option<&str>) -> bool {
        if !rule.origins.is_empty() {
            let allowed = match origin {
                Some(o) => rule.origins.contains(&normalize_origin(o)),
                None => false,
            };
            if !allowed {
                return false;
            }
        }
        if let Some(a) = agent {
            if rule.agents.iter().any(|r| r == a) {
                return true;
            }
        }
        for class in rule.agent_classes.iter() {
            let matched = match (class, agent) {
                (AgentClass::Anyone, _) => true,
                (AgentClass::Authenticated, Some(_)) => true,
                (AgentClass::Group(g), Some(a)) => self.in_group(g, a),
                _ => false,
            };
            if matched {
                return true;
            }
        }
        false
    }

    /// Whether `agent` holds `mode` on `url` when requesting from `origin`.
    ///
    /// ACL documents themselves require `Control` on the resource they govern.
    pub fn authorize(&self, agent: Option<&str>, url: &Url, mode: Mode, origin: Option<&str>) -> bool {
        let (target, mode) = match is_acl_url(url) {
            true => match acl_subject(url) {
                Some(v) => (v, Mode::Control),
                None => (url.clone(), Mode::Control),
            },
            false => (url.clone(), mode),
        };
        let layer = match self.nearest_acl(&target) {
            Ok(Some(v)) => v,
            Ok(None) => {
                debug!("no acl found for {}", target);
                return false;
            },
            Err(e) => {
                warn!("acl lookup for {} failed: {}", target, e);
                return false;
            },
        };
        layer
            .rules()
            .iter()
            .filter(|r| r.modes.iter().any(|m| mode.granted_by(*m)))
            .any(|r| self.rule_matches(r, agent, origin))
    }

    /// Like [`AclChecker::authorize`], failing with 401 for anonymous and 403 for known agents.
    pub fn check(&self, agent: Option<&str>, url: &Url, mode: Mode, origin: Option<&str>) -> Result<(), LdpError> {
        if self.authorize(agent, url, mode, origin) {
            return Ok(());
        }
        match agent {
            Some(a) => Err(LdpError::Forbidden(format!("No permission: {} access to {} denied for {}", mode, url, a))),
            None => Err(LdpError::Unauthenticated(format!("{} access to {} requires authorization", mode, url))),
        }
    }
}
