use log::{
    debug,
    info,
};
use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::handlers::existing;
use crate::ldp::Ldp;
use crate::mapper::{
    is_container_url,
    lock_key,
    MapOptions,
};
use crate::record;
use crate::remote::Document;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

fn source_url(ldp: &Ldp, req: &LdpRequest) -> Result<Url, LdpError> {
    let source = match req.header("Source") {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => {
            return Err(LdpError::BadRequest("Source header required".to_string()));
        },
    };
    match Url::parse(source) {
        Ok(v) if v.scheme() == "http" || v.scheme() == "https" => Ok(v),
        Ok(v) => Err(LdpError::BadRequest(format!("cannot copy from {}", v))),
        Err(_) => ldp.mapper.request_url(req.url.host_str(), source),
    }
}

// Sources are read as an anonymous agent.
fn load(ldp: &Ldp, source: &Url) -> Result<Document, LdpError> {
    if !ldp.mapper.is_local(source) {
        info!("fetching copy source {}", source);
        return ldp.fetcher.fetch(source);
    }
    ldp.check(None, source, Mode::Read, None)?;
    let mapping = ldp.mapper.map_url_to_file(source, MapOptions::default())?;
    if mapping.is_container {
        return Err(LdpError::BadRequest(format!("cannot copy container {}", source)));
    }
    Ok(Document {
        data: record::read(&mapping.path)?,
        content_type: mapping.content_type,
    })
}

/// Stores a copy of the `Source` resource at the request url, overwriting what is there.
pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let source = source_url(ldp, req)?;
    let url = &req.url;
    if is_container_url(url) {
        return Err(LdpError::BadRequest("COPY to a container is not supported".to_string()));
    }
    req.check(ldp, url, Mode::Write)?;

    let doc = load(ldp, &source)?;
    let target = ldp.mapper.map_url_to_file(url, MapOptions {
        content_type: Some(&doc.content_type),
        create_if_not_exists: true,
    })?;
    match target.path.parent() {
        Some(v) if v.is_dir() => {},
        _ => {
            return Err(LdpError::NotFound(format!("Parent container of {} not found", url)));
        },
    }

    ldp.locks.with_lock(&lock_key(&target.path), || {
        if let Some(old) = existing(ldp, url)? {
            if old.is_container {
                return Err(LdpError::Conflict(format!("{} already exists as a container", url)));
            }
            if old.path != target.path {
                record::remove(&old.path)?;
            }
        }
        record::put(&target.path, &doc.data[..], doc.data.len())
    })?;
    debug!("copied {} to {}", source, url);
    Ok(LdpResponse::new(201).with_header("Location", url.as_str()))
}
