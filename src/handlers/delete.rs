use std::path::Path;

use url::Url;

use crate::acl::Mode;
use crate::error::LdpError;
use crate::handlers::existing;
use crate::ldp::Ldp;
use crate::mapper::{
    acl_subject,
    acl_url,
    is_acl_url,
    is_auxiliary,
    lock_key,
    meta_url,
    MapOptions,
};
use crate::meta::is_listed;
use crate::record;
use crate::request::LdpRequest;
use crate::response::LdpResponse;

// .acl and .meta documents of a removed resource go with it
fn remove_companions(ldp: &Ldp, url: &Url, removed: &Path) -> Result<(), LdpError> {
    if is_auxiliary(url.path()) {
        return Ok(());
    }
    for companion in [acl_url(url)?, meta_url(url)?] {
        match existing(ldp, &companion)? {
            Some(m) if !m.is_container && m.path != removed => {
                record::remove(&m.path)?;
            },
            _ => {},
        }
    }
    Ok(())
}

pub fn handle(ldp: &Ldp, req: &LdpRequest) -> Result<LdpResponse, LdpError> {
    let url = &req.url;
    if ldp.mapper.is_root(url) {
        return Err(LdpError::MethodNotAllowed("Cannot delete root container".to_string()));
    }
    if is_acl_url(url) {
        if let Some(subject) = acl_subject(url) {
            if ldp.mapper.is_root(&subject) {
                return Err(LdpError::MethodNotAllowed("Cannot delete root ACL".to_string()));
            }
        }
    }

    let mapping = ldp.mapper.map_url_to_file(url, MapOptions::default())?;
    req.check(ldp, url, Mode::Write)?;

    ldp.locks.with_lock(&lock_key(&mapping.path), || {
        let mapping = match existing(ldp, url)? {
            Some(v) => v,
            None => {
                return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
            },
        };
        if mapping.is_container {
            let members = record::list(&mapping.path)?
                .iter()
                .filter(|n| is_listed(n))
                .count();
            if members > 0 {
                return Err(LdpError::Conflict("Container is not empty".to_string()));
            }
            record::remove_container(&mapping.path)
        } else {
            record::remove(&mapping.path)?;
            remove_companions(ldp, url, &mapping.path)
        }
    })?;
    Ok(LdpResponse::new(200))
}
