use log::warn;

use crate::handlers::link_header;
use crate::mapper::is_container_url;
use crate::patch::PATCH_TYPES;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

const ALLOW: &str = "OPTIONS, HEAD, GET, PATCH, PUT, DELETE, COPY";

/// Advertises the capabilities of a url. Answers whether or not the resource exists.
pub fn handle(req: &LdpRequest) -> LdpResponse {
    let container = is_container_url(&req.url);
    let allow = match container {
        true => format!("{}, POST", ALLOW),
        false => ALLOW.to_string(),
    };
    let mut res = LdpResponse::new(204)
        .with_header("Allow", &allow)
        .with_header("Accept-Patch", &PATCH_TYPES.join(", "))
        .with_header("Accept-Put", "*/*");
    if container {
        res = res.with_header("Accept-Post", "*/*");
    }
    match link_header(&req.url) {
        Ok(v) => {
            res = res.with_header("Link", &v);
        },
        Err(e) => {
            warn!("no links for {}: {}", req.url, e);
        },
    }
    res
}
