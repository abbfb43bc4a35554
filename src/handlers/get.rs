use log::debug;
use sha2::{
    Digest,
    Sha256,
};

use crate::acl::Mode;
use crate::error::LdpError;
use crate::ldp::Ldp;
use crate::mapper::{
    container_url,
    MapOptions,
};
use crate::meta::container_graph;
use crate::patch::PATCH_TYPES;
use crate::rdf::{
    can_parse,
    negotiate,
    parse_graph,
    serialize_graph,
    NEGOTIABLE,
};
use crate::record;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

fn not_acceptable(accept: Option<&str>) -> LdpError {
    LdpError::NotAcceptable(format!("Cannot serve requested type: {}", accept.unwrap_or("")))
}

/// Serves a resource, or the generated description of a container.
///
/// RDF documents are converted when the client asks for another negotiable
/// serialization. Any other content is sent as stored.
pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let mapping = ldp.mapper.map_url_to_file(&req.url, MapOptions::default())?;
    req.check(ldp, &req.url, Mode::Read)?;
    let accept = req.header("Accept");

    let (content_type, body) = if mapping.is_container {
        let url = container_url(&req.url);
        let graph = container_graph(&ldp.mapper, &url, &mapping.path)?;
        let content_type = negotiate(accept, NEGOTIABLE).ok_or_else(|| not_acceptable(accept))?;
        let body = serialize_graph(&graph, &content_type)?;
        (content_type, body)
    } else if can_parse(&mapping.content_type) {
        let mut available: Vec<&str> = vec!(mapping.content_type.as_str());
        available.extend(NEGOTIABLE.iter().filter(|t| **t != mapping.content_type));
        let content_type = negotiate(accept, &available).ok_or_else(|| not_acceptable(accept))?;
        let data = record::read(&mapping.path)?;
        if content_type == mapping.content_type {
            (content_type, data)
        } else {
            debug!("converting {} from {} to {}", req.url, mapping.content_type, content_type);
            let graph = parse_graph(&data, &req.url, &mapping.content_type)?;
            let body = serialize_graph(&graph, &content_type)?;
            (content_type, body)
        }
    } else {
        (mapping.content_type.clone(), record::read(&mapping.path)?)
    };

    let etag = format!("\"{}\"", hex::encode(Sha256::digest(&body)));
    let mut res = LdpResponse::new(200)
        .with_header("ETag", &etag)
        .with_body(&content_type, body);
    if mapping.is_container || can_parse(&content_type) {
        res = res.with_header("Accept-Patch", &PATCH_TYPES.join(", "));
    }
    Ok(res)
}
