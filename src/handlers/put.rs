use log::debug;
use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::handlers::{
    ensure_ancestors,
    existing,
    is_file_resource,
};
use crate::ldp::Ldp;
use crate::mapper::{
    is_auxiliary,
    is_container_url,
    lock_key,
    MapOptions,
};
use crate::rdf::{
    parse_graph,
    TURTLE,
};
use crate::record;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

fn create(content_type: &str) -> MapOptions<'_> {
    MapOptions {
        content_type: Some(content_type),
        create_if_not_exists: true,
    }
}

fn put_container(ldp: &Ldp, req: &LdpRequest, url: &Url) -> Result<LdpResponse, LdpError> {
    req.check(ldp, url, Mode::Write)?;
    if existing(ldp, url)?.is_some() {
        return Ok(LdpResponse::new(200));
    }
    if is_file_resource(ldp, url)? {
        return Err(LdpError::Conflict(format!("{} already exists as a resource", url)));
    }
    ensure_ancestors(ldp, req, url)?;
    let mapping = ldp.mapper.map_url_to_file(url, MapOptions {
        content_type: None,
        create_if_not_exists: true,
    })?;
    ldp.locks.with_lock(&lock_key(&mapping.path), || record::create_container(&mapping.path))?;
    Ok(LdpResponse::new(201))
}

/// Creates or replaces the representation at the request url.
pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let url = &req.url;
    if is_container_url(url) {
        return put_container(ldp, req, url);
    }

    let content_type = match req.content_type() {
        Some(v) => v,
        None => {
            return Err(LdpError::BadRequest("PUT request requires a content-type via the Content-Type header".to_string()));
        },
    };
    if is_auxiliary(url.path()) {
        if content_type != TURTLE {
            return Err(LdpError::UnsupportedMediaType(format!("{} must be stored as {}", url, TURTLE)));
        }
        parse_graph(&req.body, url, TURTLE)?;
    }

    if let Some(m) = existing(ldp, url)? {
        if m.is_container {
            return Err(LdpError::Conflict(format!("{} already exists as a container", url)));
        }
    }
    req.check(ldp, url, Mode::Write)?;
    ensure_ancestors(ldp, req, url)?;

    let target = ldp.mapper.map_url_to_file(url, create(&content_type))?;
    let (stored, replaced) = ldp.locks.with_lock(&lock_key(&target.path), || {
        let current = existing(ldp, url)?;
        if let Some(dir) = target.path.parent() {
            record::create_container(dir)?;
        }
        if let Some(old) = current.as_ref() {
            if old.is_container {
                return Err(LdpError::Conflict(format!("{} already exists as a container", url)));
            }
            if old.path != target.path {
                debug!("replacing {:?} with {:?}", old.path, target.path);
                record::remove(&old.path)?;
            }
        }
        let stored = record::put(&target.path, &req.body[..], req.body.len())?;
        Ok((stored, current.is_some()))
    })?;

    let status = match replaced {
        true => 200,
        false => 201,
    };
    Ok(LdpResponse::new(status).with_header("ETag", &stored.etag()))
}
