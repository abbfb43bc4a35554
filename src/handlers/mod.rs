//! One module per supported verb.
//!
//! Handlers return either a response or an [LdpError], which the caller
//! renders with the matching status.
use log::debug;
use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::ldp::Ldp;
use crate::mapper::{
    acl_url,
    is_container_url,
    meta_url,
    MapOptions,
    Mapping,
};
use crate::meta::{
    LDP_BASIC_CONTAINER,
    LDP_CONTAINER,
    LDP_RESOURCE,
};
use crate::request::{
    LdpRequest,
    Verb,
};
use crate::response::LdpResponse;

pub mod copy;
pub mod delete;
pub mod get;
pub mod options;
pub mod patch;
pub mod post;
pub mod put;

pub fn dispatch(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    debug!("{} {} agent {:?}", req.verb.as_str(), req.url, req.agent);
    let mut res = match req.verb {
        // the transport omits the body of HEAD responses
        Verb::Head | Verb::Get => get::handle(ldp, req)?,
        Verb::Put => put::handle(ldp, req)?,
        Verb::Post => post::handle(ldp, req)?,
        Verb::Patch => patch::handle(ldp, req)?,
        Verb::Delete => delete::handle(ldp, req)?,
        Verb::Copy => copy::handle(ldp, req)?,
        Verb::Options => options::handle(req),
    };
    if res.status < 300 && res.header("Link").is_none() {
        res.headers.push(("Link".to_string(), link_header(&req.url)?));
    }
    Ok(res)
}

/// Type, ACL and metadata links of a resource.
pub fn link_header(url: &Url) -> Result<String, LdpError> {
    let mut links: Vec<String> = vec!();
    links.push(format!("<{}>; rel=\"type\"", LDP_RESOURCE));
    if is_container_url(url) {
        links.push(format!("<{}>; rel=\"type\"", LDP_BASIC_CONTAINER));
        links.push(format!("<{}>; rel=\"type\"", LDP_CONTAINER));
    }
    links.push(format!("<{}>; rel=\"acl\"", acl_url(url)?));
    links.push(format!("<{}>; rel=\"describedBy\"", meta_url(url)?));
    Ok(links.join(", "))
}

/// Current storage of `url`, if any.
pub fn existing(ldp: &Ldp, url: &Url) -> Result<Option<Mapping>, LdpError> {
    match ldp.mapper.map_url_to_file(url, MapOptions::default()) {
        Ok(v) => Ok(Some(v)),
        Err(LdpError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether a container url is taken by a plain resource of the same name.
pub fn is_file_resource(ldp: &Ldp, container: &Url) -> Result<bool, LdpError> {
    let trimmed = container.as_str().trim_end_matches('/');
    let url = match Url::parse(trimmed) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::internal("cannot build resource url", e));
        },
    };
    match existing(ldp, &url)? {
        Some(m) => Ok(!m.is_container),
        None => Ok(false),
    }
}

/// Verifies the containers above `url` can hold it.
///
/// Ancestors that would have to be created require Write on the closest
/// container that exists. An ancestor name held by a plain resource is a
/// conflict. Nothing is created here.
pub fn ensure_ancestors(ldp: &Ldp, req: &LdpRequest, url: &Url) -> Result<(), LdpError> {
    let mut missing = false;
    let mut top: Option<Url> = None;
    let mut current = ldp.mapper.parent_container(url);
    while let Some(parent) = current {
        if existing(ldp, &parent)?.is_some() {
            if missing {
                req.check(ldp, &parent, Mode::Write)?;
            }
            return Ok(());
        }
        if is_file_resource(ldp, &parent)? {
            return Err(LdpError::Conflict(format!("{} is not a container", parent)));
        }
        missing = true;
        current = ldp.mapper.parent_container(&parent);
        top = Some(parent);
    }
    if let Some(v) = top {
        req.check(ldp, &v, Mode::Write)?;
    }
    Ok(())
}
