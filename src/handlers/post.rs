use log::debug;
use percent_encoding::percent_decode_str;
use url::Url;
use uuid::Uuid;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::handlers::{
    existing,
    patch,
};
use crate::ldp::Ldp;
use crate::mapper::{
    container_url,
    content_type_from_name,
    encode_segment,
    extension_for_content_type,
    is_auxiliary,
    MapOptions,
};
use crate::meta::{
    LDP_BASIC_CONTAINER,
    LDP_CONTAINER,
};
use crate::patch::SPARQL_UPDATE;
use crate::record;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

const MAX_NAME_ATTEMPTS: usize = 8;

/// Whether the client asked for a container through a `rel="type"` link.
fn wants_container(req: &LdpRequest) -> bool {
    let link = match req.header("Link") {
        Some(v) => v,
        None => {
            return false;
        },
    };
    let basic = format!("<{}>", LDP_BASIC_CONTAINER);
    let container = format!("<{}>", LDP_CONTAINER);
    link.split(',')
        .map(|l| l.trim())
        .any(|l| l.contains("rel=\"type\"") && (l.starts_with(&basic) || l.starts_with(&container)))
}

fn slug(req: &LdpRequest) -> Result<Option<String>, LdpError> {
    let raw = match req.header("Slug") {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => {
            return Ok(None);
        },
    };
    let decoded = match percent_decode_str(raw).decode_utf8() {
        Ok(v) => v.to_string(),
        Err(e) => {
            return Err(LdpError::BadRequest(format!("invalid slug {}: {}", raw, e)));
        },
    };
    if decoded.contains(|c| c == '/' || c == '|' || c == ':') {
        return Err(LdpError::BadRequest(format!("invalid slug {}", decoded)));
    }
    if is_auxiliary(&decoded) {
        return Err(LdpError::Forbidden(format!("POST is not allowed for auxiliary resources: {}", decoded)));
    }
    Ok(Some(decoded))
}

fn with_extension(name: String, content_type: &str) -> String {
    if content_type_from_name(&name) == content_type {
        return name;
    }
    match extension_for_content_type(content_type) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

/// `report.ttl` becomes `report<suffix>.ttl`.
fn with_suffix(name: &str, suffix: &str, is_container: bool) -> String {
    match name.rfind('.') {
        Some(i) if i > 0 && !is_container => format!("{}{}{}", &name[..i], suffix, &name[i..]),
        _ => format!("{}{}", name, suffix),
    }
}

fn member_url(container: &Url, name: &str, is_container: bool) -> Result<Url, LdpError> {
    let mut segment = encode_segment(name);
    if is_container {
        segment.push('/');
    }
    container.join(&segment).map_err(|e| LdpError::BadRequest(format!("invalid resource name {}: {}", name, e)))
}

fn is_taken(ldp: &Ldp, url: &Url) -> Result<bool, LdpError> {
    let resource = match Url::parse(url.as_str().trim_end_matches('/')) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::internal("cannot build resource url", e));
        },
    };
    Ok(existing(ldp, &resource)?.is_some())
}

/// Creates a new member of the container at the request url.
pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let content_type = req.content_type();
    if content_type.as_deref() == Some(SPARQL_UPDATE) {
        debug!("POST of {} treated as PATCH", SPARQL_UPDATE);
        return patch::handle(ldp, req);
    }

    let container = ldp.mapper.map_url_to_file(&req.url, MapOptions::default())?;
    if !container.is_container {
        return Err(LdpError::BadRequest("Requested resource is not a container".to_string()));
    }
    let content_type = match content_type {
        Some(v) => v,
        None => {
            return Err(LdpError::BadRequest("POST request requires a content-type via the Content-Type header".to_string()));
        },
    };
    let url = container_url(&req.url);
    req.check(ldp, &url, Mode::Append)?;

    let is_container = wants_container(req);
    let base = match slug(req)? {
        Some(v) => v,
        None => Uuid::new_v4().to_string(),
    };
    let name = match is_container {
        true => base,
        false => with_extension(base, &content_type),
    };

    // members of one container are named one at a time
    let target = ldp.locks.with_lock(&container.path, || {
        let mut candidate = name.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let target = member_url(&url, &candidate, is_container)?;
            if !is_taken(ldp, &target)? && create_member(ldp, req, &target, &content_type, is_container)? {
                return Ok(target);
            }
            candidate = with_suffix(&name, &format!("-{}", Uuid::new_v4()), is_container);
            debug!("{} exists, trying {}", target, candidate);
        }
        Err(LdpError::Conflict(format!("no free name for {} in {}", name, url)))
    })?;
    Ok(LdpResponse::new(201).with_header("Location", target.as_str()))
}

// false if the name was taken in the meantime
fn create_member(ldp: &Ldp, req: &LdpRequest, target: &Url, content_type: &str, is_container: bool) -> Result<bool, LdpError> {
    if is_container {
        let mapping = ldp.mapper.map_url_to_file(target, MapOptions {
            content_type: None,
            create_if_not_exists: true,
        })?;
        return record::create_new_container(&mapping.path);
    }
    let mapping = ldp.mapper.map_url_to_file(target, MapOptions {
        content_type: Some(content_type),
        create_if_not_exists: true,
    })?;
    let created = record::put_new(&mapping.path, &req.body[..], req.body.len())?;
    Ok(created.is_some())
}
