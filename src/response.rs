use std::path::Path;

use log::{
    debug,
    warn,
};
use tiny_http::{
    Header,
    Request,
    Response,
    StatusCode,
};

use crate::error::LdpError;

pub const EXPOSED_HEADERS: &str = "Accept-Patch, Accept-Post, Accept-Put, Allow, Content-Length, Content-Type, ETag, Link, Location, MS-Author-Via, Updates-Via, Vary, WWW-Authenticate";
const ALLOWED_METHODS: &str = "OPTIONS, HEAD, GET, PATCH, POST, PUT, DELETE, COPY";
const ALLOWED_HEADERS: &str = "Accept, Authorization, Content-Type, Link, Slug, Source, Origin, If-Match, If-None-Match";

/// Outgoing response, independent of the transport.
#[derive(Debug)]
pub struct LdpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl LdpResponse {
    pub fn new(status: u16) -> LdpResponse {
        LdpResponse {
            status,
            headers: vec!(),
            body: vec!(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> LdpResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> LdpResponse {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }

    pub fn with_text(self, s: &str) -> LdpResponse {
        self.with_body("text/plain; charset=utf-8", s.as_bytes().to_vec())
    }

    /// First value of a header, matched case insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Renders an error, using `<error_pages>/<status>.html` when that page exists.
    pub fn from_error(e: &LdpError, error_pages: Option<&Path>) -> LdpResponse {
        let status = e.status();
        let res = LdpResponse::new(status);
        if let Some(dir) = error_pages {
            let page = dir.join(format!("{}.html", status));
            match std::fs::read(&page) {
                Ok(v) => {
                    return res.with_body("text/html; charset=utf-8", v);
                },
                Err(e) => {
                    debug!("no error page {:?}: {}", page, e);
                },
            }
        }
        let res = res.with_text(&format!("{}\n", e));
        match e {
            LdpError::Unauthenticated(_) => res.with_header("WWW-Authenticate", "Mock realm=\"ldpd\""),
            _ => res,
        }
    }
}

/// CORS and identification headers sent with every response.
pub fn origin_headers(origin: Option<&str>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec!();
    let allow_origin = match origin {
        Some(v) => v,
        None => "*",
    };
    headers.push(("Access-Control-Allow-Origin".to_string(), allow_origin.to_string()));
    // browsers refuse credentials with a wildcard origin
    if allow_origin != "*" {
        headers.push(("Access-Control-Allow-Credentials".to_string(), "true".to_string()));
    }
    headers.push(("Access-Control-Allow-Methods".to_string(), ALLOWED_METHODS.to_string()));
    headers.push(("Access-Control-Allow-Headers".to_string(), ALLOWED_HEADERS.to_string()));
    headers.push(("Access-Control-Expose-Headers".to_string(), EXPOSED_HEADERS.to_string()));
    headers.push(("Vary".to_string(), "Accept, Authorization, Origin".to_string()));
    headers.push(("MS-Author-Via".to_string(), "SPARQL".to_string()));

    let server_header_v = format!("ldpd/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    headers.push(("Server".to_string(), server_header_v));
    headers
}

/// Sends `r` as the answer to `req`.
pub fn exec_response(req: Request, r: LdpResponse) {
    let mut res = Response::from_data(r.body).with_status_code(StatusCode(r.status));
    for (k, v) in r.headers.iter() {
        match Header::from_bytes(k.as_bytes(), v.as_bytes()) {
            Ok(h) => {
                res.add_header(h);
            },
            Err(_) => {
                warn!("dropping invalid header {}: {}", k, v);
            },
        }
    }
    if let Err(e) = req.respond(res) {
        warn!("cannot send response: {}", e);
    }
}
