//! Outbound fetching of documents this store does not hold itself.
use std::io::Read;
use std::time::Duration;

use log::debug;
use ureq::{
    Agent,
    AgentBuilder,
};
use url::Url;

use crate::error::LdpError;
use crate::mapper::DEFAULT_CONTENT_TYPE;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024;

pub struct Document {
    pub data: Vec<u8>,
    pub content_type: String,
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<Document, LdpError>;
}

/// Fetches public documents over HTTP, without forwarding any credentials.
pub struct HttpFetcher {
    agent: Agent,
}

impl HttpFetcher {
    pub fn new() -> HttpFetcher {
        HttpFetcher {
            agent: AgentBuilder::new()
                .timeout(FETCH_TIMEOUT)
                .build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> HttpFetcher {
        HttpFetcher::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Document, LdpError> {
        debug!("fetching remote {}", url);
        let rs = match self.agent.get(url.as_str()).set("Accept", "text/turtle, */*;q=0.5").call() {
            Ok(v) => v,
            Err(ureq::Error::Status(404, _)) => {
                return Err(LdpError::NotFound(format!("{} not found", url)));
            },
            Err(ureq::Error::Status(code, _)) => {
                return Err(LdpError::BadRequest(format!("fetching {} failed with status {}", url, code)));
            },
            Err(e) => {
                return Err(LdpError::internal(&format!("fetching {} failed", url), e));
            },
        };
        let content_type = match rs.header("Content-Type") {
            Some(_) => rs.content_type().to_lowercase(),
            None => DEFAULT_CONTENT_TYPE.to_string(),
        };
        let mut data: Vec<u8> = vec!();
        if let Err(e) = rs.into_reader().take(MAX_DOCUMENT_SIZE).read_to_end(&mut data) {
            return Err(LdpError::internal(&format!("reading {} failed", url), e));
        }
        Ok(Document {
            data,
            content_type,
        })
    }
}
