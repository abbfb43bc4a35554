use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::handlers::{
    ensure_ancestors,
    existing,
};
use crate::ldp::Ldp;
use crate::mapper::{
    content_type_from_name,
    is_container_url,
    lock_key,
    MapOptions,
    Mapping,
};
use crate::patch::{
    parse_patch,
    patch_file,
    PATCH_TYPES,
};
use crate::rdf::{
    can_parse,
    TURTLE,
};
use crate::record;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

// Current document of `url`, or where a new one would be stored.
fn storage(ldp: &Ldp, url: &Url) -> Result<(Mapping, bool), LdpError> {
    match existing(ldp, url)? {
        Some(m) if m.is_container => Err(LdpError::MethodNotAllowed("Cannot patch a container".to_string())),
        Some(m) => Ok((m, true)),
        None => {
            let from_name = content_type_from_name(url.path());
            let content_type = match can_parse(from_name) {
                true => from_name,
                false => TURTLE,
            };
            let m = ldp.mapper.map_url_to_file(url, MapOptions {
                content_type: Some(content_type),
                create_if_not_exists: true,
            })?;
            Ok((m, false))
        },
    }
}

/// Applies a SPARQL Update or N3 patch to the RDF document at the request url.
///
/// A missing document is created, starting from the empty graph.
pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let patch_type = req.content_type().unwrap_or_default();
    if !PATCH_TYPES.contains(&patch_type.as_str()) {
        return Err(LdpError::UnsupportedMediaType(format!("Unsupported patch content type: {}", patch_type)));
    }
    if is_container_url(&req.url) {
        return Err(LdpError::MethodNotAllowed("Cannot patch a container".to_string()));
    }

    let (mapping, exists) = storage(ldp, &req.url)?;

    let patch = parse_patch(&req.body, &req.url, &patch_type)?;
    for mode in patch.required_modes() {
        req.check(ldp, &req.url, mode)?;
    }
    if !exists {
        if let Some(parent) = ldp.mapper.parent_container(&req.url) {
            req.check(ldp, &parent, Mode::Write)?;
        }
        ensure_ancestors(ldp, req, &req.url)?;
    }

    ldp.locks.with_lock(&lock_key(&mapping.path), || {
        let (mapping, _) = storage(ldp, &req.url)?;
        if let Some(dir) = mapping.path.parent() {
            record::create_container(dir)?;
        }
        patch_file(&mapping.path, &mapping.content_type, &patch)
    })?;
    Ok(LdpResponse::new(200).with_text("Patch applied successfully"))
}
