//! The store every request handler works against.
use std::path::{
    Path,
    PathBuf,
};

use log::info;
use url::Url;

use crate::acl::{
    AclChecker,
    Mode,
};
use crate::arg::Settings;
use crate::auth::{
    mock::MockAuthenticator,
    Authenticator,
};
use crate::error::LdpError;
use crate::lock::LockManager;
use crate::mapper::{
    container_url,
    is_container_url,
    MapOptions,
    ResourceMapper,
    LOCK_DIR,
};
use crate::remote::{
    Fetcher,
    HttpFetcher,
};
use crate::token::TokenService;

pub struct Ldp {
    pub mapper: ResourceMapper,
    pub locks: LockManager,
    pub tokens: TokenService,
    pub fetcher: Box<dyn Fetcher>,
    pub authenticators: Vec<Box<dyn Authenticator>>,
    pub acl: bool,
    pub force_user: Option<String>,
    pub error_pages: Option<PathBuf>,
}

impl Ldp {
    /// Single host store with access control and default lock policy.
    pub fn new(root_url: &Url, root_path: &Path) -> Ldp {
        Ldp {
            mapper: ResourceMapper::new(root_url, root_path, false),
            locks: LockManager::new(&root_path.join(LOCK_DIR)),
            tokens: TokenService::new(),
            fetcher: Box::new(HttpFetcher::new()),
            authenticators: vec!(),
            acl: true,
            force_user: None,
            error_pages: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Ldp, LdpError> {
        let root_url = match settings.server_uri() {
            Ok(v) => v,
            Err(e) => {
                return Err(LdpError::internal("invalid server uri", e));
            },
        };
        if let Err(e) = std::fs::create_dir_all(&settings.root) {
            return Err(LdpError::internal("cannot create storage root", e));
        }
        let root_path = match settings.root.canonicalize() {
            Ok(v) => v,
            Err(e) => {
                return Err(LdpError::internal("cannot resolve storage root", e));
            },
        };
        info!("serving {} from {:?}", root_url, root_path);

        let mut authenticators: Vec<Box<dyn Authenticator>> = vec!();
        if settings.mock_auth {
            authenticators.push(Box::new(MockAuthenticator {}));
        }
        Ok(Ldp {
            mapper: ResourceMapper::new(&root_url, &root_path, settings.multiuser),
            locks: LockManager::with_policy(
                &root_path.join(LOCK_DIR),
                settings.lock_stale,
                settings.lock_retries,
                crate::lock::DEFAULT_RETRY_INTERVAL,
            ),
            tokens: TokenService::new(),
            fetcher: Box::new(HttpFetcher::new()),
            authenticators,
            acl: settings.acl,
            force_user: settings.force_user.clone(),
            error_pages: settings.error_pages.clone(),
        })
    }

    pub fn acl_checker(&self) -> AclChecker<'_> {
        AclChecker::new(&self.mapper, self.fetcher.as_ref())
    }

    /// Url under which a resource is governed by access control.
    ///
    /// A container addressed without its trailing slash is the container.
    pub fn governed_url(&self, url: &Url) -> Url {
        if is_container_url(url) {
            return url.clone();
        }
        match self.mapper.map_url_to_file(url, MapOptions::default()) {
            Ok(m) if m.is_container => container_url(url),
            _ => url.clone(),
        }
    }

    /// Fails unless `agent` holds `mode` on `url`. Always passes with access control disabled.
    pub fn check(&self, agent: Option<&str>, url: &Url, mode: Mode, origin: Option<&str>) -> Result<(), LdpError> {
        if !self.acl {
            return Ok(());
        }
        let url = self.governed_url(url);
        self.acl_checker().check(agent, &url, mode, origin)
    }
}
