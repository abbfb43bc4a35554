use log::{
    debug,
    info,
    warn,
};
use tiny_http::{
    Method,
    Request,
};
use url::Url;

use crate::acl::Mode;
use crate::auth::authenticate;
use crate::error::LdpError;
use crate::handlers::dispatch;
use crate::ldp::Ldp;
use crate::mapper::media_type;
use crate::response::{
    origin_headers,
    LdpResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Head,
    Get,
    Put,
    Post,
    Patch,
    Delete,
    Copy,
    Options,
}

impl Verb {
    pub fn from_method(method: &Method) -> Option<Verb> {
        match method {
            Method::Head => Some(Verb::Head),
            Method::Get => Some(Verb::Get),
            Method::Put => Some(Verb::Put),
            Method::Post => Some(Verb::Post),
            Method::Patch => Some(Verb::Patch),
            Method::Delete => Some(Verb::Delete),
            Method::Options => Some(Verb::Options),
            Method::NonStandard(s) if s.as_str().eq_ignore_ascii_case("COPY") => Some(Verb::Copy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Head => "HEAD",
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Copy => "COPY",
            Verb::Options => "OPTIONS",
        }
    }
}

/// Everything a handler needs to know about an incoming request.
pub struct LdpRequest {
    pub verb: Verb,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub agent: Option<String>,
}

impl LdpRequest {
    pub fn new(verb: Verb, url: Url) -> LdpRequest {
        LdpRequest {
            verb,
            url,
            headers: vec!(),
            body: vec!(),
            agent: None,
        }
    }

    /// First value of a header, matched case insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Media type of the body without parameters.
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").and_then(media_type)
    }

    pub fn origin(&self) -> Option<&str> {
        self.header("Origin")
    }

    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    /// Fails unless the requesting agent holds `mode` on `url`.
    pub fn check(&self, ldp: &Ldp, url: &Url, mode: Mode) -> Result<(), LdpError> {
        ldp.check(self.agent(), url, mode, self.origin())
    }
}

/// Handle client input by method type.
///
/// Errors of the handler are rendered as responses, and the common CORS and
/// identification headers are added to every response.
pub fn process_method(ldp: &Ldp, req: &LdpRequest) -> LdpResponse {
    let mut res = match dispatch(ldp, req) {
        Ok(v) => v,
        Err(e) => {
            debug!("{} {} failed: {}", req.verb.as_str(), req.url, e);
            LdpResponse::from_error(&e, ldp.error_pages.as_deref())
        },
    };
    res.headers.extend(origin_headers(req.origin()));
    info!("{} {} {}", req.verb.as_str(), req.url, res.status);
    res
}

fn error_response(ldp: &Ldp, e: LdpError, origin: Option<&str>) -> LdpResponse {
    let mut res = LdpResponse::from_error(&e, ldp.error_pages.as_deref());
    res.headers.extend(origin_headers(origin));
    res
}

/// Reads a transport request into an [LdpRequest] and processes it.
pub fn process_request(ldp: &Ldp, req: &mut Request) -> LdpResponse {
    let mut headers: Vec<(String, String)> = vec!();
    for h in req.headers() {
        headers.push((h.field.as_str().as_str().to_string(), h.value.as_str().to_string()));
    }
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };
    let origin = header("Origin");

    let verb = match Verb::from_method(req.method()) {
        Some(v) => v,
        None => {
            let e = LdpError::MethodNotAllowed(format!("method {} not supported", req.method()));
            return error_response(ldp, e, origin.as_deref());
        },
    };
    let url = match ldp.mapper.request_url(header("Host").as_deref(), req.url()) {
        Ok(v) => v,
        Err(e) => {
            return error_response(ldp, e, origin.as_deref());
        },
    };
    let agent = match authenticate(&ldp.authenticators, header("Authorization").as_deref(), ldp.force_user.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            warn!("rejecting credentials for {} {}: {}", verb.as_str(), url, e);
            return error_response(ldp, e, origin.as_deref());
        },
    };

    let mut body: Vec<u8> = vec!();
    if let Err(e) = req.as_reader().read_to_end(&mut body) {
        let e = LdpError::BadRequest(format!("cannot read request body: {}", e));
        return error_response(ldp, e, origin.as_deref());
    }

    let rq = LdpRequest {
        verb,
        url,
        headers,
        body,
        agent,
    };
    process_method(ldp, &rq)
}

#[cfg(test)]
mod tests {
    use std::fs::{
        create_dir_all,
        read,
        read_dir,
        write,
    };
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;
    use url::Url;

    use super::{
        process_method,
        LdpRequest,
        Verb,
    };
    use crate::ldp::Ldp;
    use crate::lock::{
        LockManager,
        DEFAULT_STALE_AFTER,
    };
    use crate::mapper::{
        remove_dollar_extension,
        LOCK_DIR,
    };
    use crate::rdf::{
        parse_graph,
        TURTLE,
    };

    const ALICE: &str = "https://alice.example/profile#me";
    const PREFIXES: &str = "@prefix acl: <http://www.w3.org/ns/auth/acl#> .\n@prefix foaf: <http://xmlns.com/foaf/0.1/> .\n";

    fn url(s: &str) -> Url {
        Url::parse(&format!("https://localhost:8443{}", s)).unwrap()
    }

    fn store(root: &Path) -> Ldp {
        Ldp::new(&url("/"), root)
    }

    fn owner_acl(root: &Path) {
        let acl = format!("{}<#owner> acl:accessTo <./> ; acl:default <./> ; acl:agent <{}> ; acl:mode acl:Control .\n", PREFIXES, ALICE);
        write(root.join(".acl"), acl).unwrap();
    }

    fn request(verb: Verb, path: &str, agent: Option<&str>) -> LdpRequest {
        let mut rq = LdpRequest::new(verb, url(path));
        rq.agent = agent.map(|v| v.to_string());
        rq
    }

    fn with_body(mut rq: LdpRequest, content_type: &str, body: &str) -> LdpRequest {
        rq.headers.push(("Content-Type".to_string(), content_type.to_string()));
        rq.body = body.as_bytes().to_vec();
        rq
    }

    #[test]
    fn test_put_twice() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        let ldp = store(d.path());

        let rq = with_body(request(Verb::Put, "/notes/a.txt", Some(ALICE)), "text/plain", "foo");
        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 201);
        let first = read(d.path().join("notes").join("a.txt")).unwrap();

        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 200);
        assert_eq!(read(d.path().join("notes").join("a.txt")).unwrap(), first);
        assert!(res.header("ETag").is_some());

        let res = process_method(&ldp, &request(Verb::Get, "/notes/a.txt", Some(ALICE)));
        assert_eq!(res.status, 200);
        assert_eq!(res.body, b"foo".to_vec());
        assert_eq!(res.header("Content-Type").unwrap(), "text/plain");
    }

    #[test]
    fn test_put_into_empty_acl() {
        let d = tempdir().unwrap();
        create_dir_all(d.path().join("foo")).unwrap();
        write(d.path().join("foo").join(".acl"), "").unwrap();
        let ldp = store(d.path());
        let rq = with_body(request(Verb::Put, "/foo/test", Some(ALICE)), "text/plain", "x");
        assert_eq!(process_method(&ldp, &rq).status, 403);
        assert!(!d.path().join("foo").join("test").exists());
    }

    #[test]
    fn test_public_read() {
        let d = tempdir().unwrap();
        create_dir_all(d.path().join("pub")).unwrap();
        let acl = format!("{}<#public> acl:accessTo <./> ; acl:default <./> ; acl:agentClass foaf:Agent ; acl:mode acl:Read .\n", PREFIXES);
        write(d.path().join("pub").join(".acl"), acl).unwrap();
        write(d.path().join("pub").join("x"), "hello").unwrap();
        let ldp = store(d.path());

        let res = process_method(&ldp, &request(Verb::Get, "/pub/x", None));
        assert_eq!(res.status, 200);
        assert_eq!(res.body, b"hello".to_vec());

        let rq = with_body(request(Verb::Put, "/pub/x", None), "text/plain", "bye");
        assert_eq!(process_method(&ldp, &rq).status, 401);
        let rq = with_body(request(Verb::Put, "/pub/x", Some(ALICE)), "text/plain", "bye");
        assert_eq!(process_method(&ldp, &rq).status, 403);
        assert_eq!(read(d.path().join("pub").join("x")).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_post_slug_collision() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("report.ttl"), "<a> <b> <c> .").unwrap();
        let ldp = store(d.path());

        let mut rq = with_body(request(Verb::Post, "/", Some(ALICE)), "text/turtle", "<d> <e> <f> .");
        rq.headers.push(("Slug".to_string(), "report.ttl".to_string()));
        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 201);
        let location = res.header("Location").unwrap().to_string();
        assert_ne!(location, url("/report.ttl").as_str());
        assert!(location.ends_with(".ttl"));
        assert_eq!(read(d.path().join("report.ttl")).unwrap(), b"<a> <b> <c> .".to_vec());
        assert_eq!(read_dir(d.path()).unwrap().filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".ttl")).count(), 2);

        let res = process_method(&ldp, &request(Verb::Get, Url::parse(&location).unwrap().path(), Some(ALICE)));
        assert_eq!(res.status, 200);
    }

    #[test]
    fn test_post_errors() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("file.txt"), "x").unwrap();
        let ldp = store(d.path());

        let rq = with_body(request(Verb::Post, "/missing/", Some(ALICE)), "text/plain", "x");
        assert_eq!(process_method(&ldp, &rq).status, 404);
        let rq = with_body(request(Verb::Post, "/file.txt", Some(ALICE)), "text/plain", "x");
        assert_eq!(process_method(&ldp, &rq).status, 400);
        let mut rq = with_body(request(Verb::Post, "/", Some(ALICE)), "text/plain", "x");
        rq.headers.push(("Slug".to_string(), "a:b".to_string()));
        assert_eq!(process_method(&ldp, &rq).status, 400);
        let mut rq = with_body(request(Verb::Post, "/", Some(ALICE)), "text/turtle", "");
        rq.headers.push(("Slug".to_string(), "x.acl".to_string()));
        assert_eq!(process_method(&ldp, &rq).status, 403);
    }

    #[test]
    fn test_patch_insert() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let ldp = store(d.path());

        let patch = "@prefix p: <http://example.org/patch#> .\n<#patch> p:patches <https://localhost:8443/doc.ttl> ;\n  p:insert { <d> <e> <f> . } .";
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "text/n3", patch);
        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 200);
        assert_eq!(res.body, b"Patch applied successfully".to_vec());

        let data = read(d.path().join("doc.ttl")).unwrap();
        assert_eq!(parse_graph(&data, &url("/doc.ttl"), TURTLE).unwrap().len(), 2);
    }

    #[test]
    fn test_patch_statuses() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let ldp = store(d.path());

        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/json", "{}");
        assert_eq!(process_method(&ldp, &rq).status, 415);
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <a> ");
        assert_eq!(process_method(&ldp, &rq).status, 400);
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "DELETE DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 409);

        let rq = with_body(request(Verb::Patch, "/new/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 200);
        assert!(d.path().join("new").join("doc.ttl").is_file());
    }

    #[test]
    fn test_delete() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        create_dir_all(d.path().join("c")).unwrap();
        write(d.path().join("c").join("x.txt"), "x").unwrap();
        write(d.path().join("c").join("x.txt.meta"), "").unwrap();
        let ldp = store(d.path());

        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/c/", Some(ALICE))).status, 409);
        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/", Some(ALICE))).status, 405);
        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/.acl", Some(ALICE))).status, 405);
        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/c/x.txt", Some(ALICE))).status, 200);
        assert!(!d.path().join("c").join("x.txt.meta").exists());
        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/c/x.txt", Some(ALICE))).status, 404);
        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/c/", Some(ALICE))).status, 200);
        assert!(!d.path().join("c").exists());
    }

    #[test]
    fn test_copy_and_options() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        let acl = format!("{}<#public> acl:accessTo <src.txt> ; acl:agentClass foaf:Agent ; acl:mode acl:Read .\n", PREFIXES);
        write(d.path().join("src.txt.acl"), acl).unwrap();
        write(d.path().join("src.txt"), "copied").unwrap();
        let ldp = store(d.path());

        assert_eq!(process_method(&ldp, &request(Verb::Copy, "/dst.txt", Some(ALICE))).status, 400);
        let mut rq = request(Verb::Copy, "/dst.txt", Some(ALICE));
        rq.headers.push(("Source".to_string(), "/src.txt".to_string()));
        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 201);
        assert_eq!(read(d.path().join("dst.txt")).unwrap(), b"copied".to_vec());

        let mut rq = request(Verb::Copy, "/nowhere/dst.txt", Some(ALICE));
        rq.headers.push(("Source".to_string(), "/src.txt".to_string()));
        assert_eq!(process_method(&ldp, &rq).status, 404);

        let res = process_method(&ldp, &request(Verb::Options, "/not/there/", None));
        assert_eq!(res.status, 204);
        assert!(res.header("Allow").unwrap().contains("POST"));
        assert!(res.header("Link").unwrap().contains("BasicContainer"));
    }

    #[test]
    fn test_get_container_negotiation() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let ldp = store(d.path());

        let mut rq = request(Verb::Get, "/", Some(ALICE));
        rq.headers.push(("Accept".to_string(), "application/n-triples".to_string()));
        let res = process_method(&ldp, &rq);
        assert_eq!(res.status, 200);
        assert_eq!(res.header("Content-Type").unwrap(), "application/n-triples");
        let body = String::from_utf8(res.body).unwrap();
        assert!(body.contains("<https://localhost:8443/> <http://www.w3.org/ns/ldp#contains> <https://localhost:8443/doc.ttl> ."));
        assert!(!body.contains(".acl"));

        let mut rq = request(Verb::Get, "/doc.ttl", Some(ALICE));
        rq.headers.push(("Accept".to_string(), "image/png".to_string()));
        assert_eq!(process_method(&ldp, &rq).status, 406);
    }

    #[test]
    fn test_container_without_slash_uses_own_acl() {
        let d = tempdir().unwrap();
        let public = format!("{}<#public> acl:accessTo <./> ; acl:default <./> ; acl:agentClass foaf:Agent ; acl:mode acl:Read, acl:Write .\n", PREFIXES);
        write(d.path().join(".acl"), public).unwrap();
        create_dir_all(d.path().join("private")).unwrap();
        owner_acl(&d.path().join("private"));
        write(d.path().join("private").join("secret.txt"), "s").unwrap();
        let ldp = store(d.path());

        assert_eq!(process_method(&ldp, &request(Verb::Get, "/private/", None)).status, 401);
        let res = process_method(&ldp, &request(Verb::Get, "/private", None));
        assert_eq!(res.status, 401);
        assert!(!String::from_utf8_lossy(&res.body).contains("secret.txt"));
        assert_eq!(process_method(&ldp, &request(Verb::Get, "/private", Some(ALICE))).status, 200);

        assert_eq!(process_method(&ldp, &request(Verb::Delete, "/private", None)).status, 401);
        assert!(d.path().join("private").join(".acl").is_file());
        let rq = with_body(request(Verb::Post, "/private", None), "text/plain", "x");
        assert_eq!(process_method(&ldp, &rq).status, 401);

        // the public root still governs everything else
        assert_eq!(process_method(&ldp, &request(Verb::Get, "/", None)).status, 200);
    }

    #[test]
    fn test_concurrent_post_same_slug() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        let ldp = Arc::new(store(d.path()));

        let mut handles = vec!();
        for i in 0..8 {
            let ldp = Arc::clone(&ldp);
            handles.push(thread::spawn(move || {
                let mut rq = with_body(request(Verb::Post, "/", Some(ALICE)), "text/plain", &format!("body {}", i));
                rq.headers.push(("Slug".to_string(), "n.txt".to_string()));
                let res = process_method(&ldp, &rq);
                assert_eq!(res.status, 201);
                res.header("Location").unwrap().to_string()
            }));
        }
        let locations: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(locations.len(), 8);
        assert!(locations.contains(url("/n.txt").as_str()));

        let bodies: HashSet<Vec<u8>> = read_dir(d.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|x| x == "txt").unwrap_or(false))
            .map(|p| read(p).unwrap())
            .collect();
        assert_eq!(bodies.len(), 8);
    }

    #[test]
    fn test_concurrent_put_content_types() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        create_dir_all(d.path().join("notes")).unwrap();
        let ldp = Arc::new(store(d.path()));

        let mut handles = vec!();
        for i in 0..8 {
            let ldp = Arc::clone(&ldp);
            handles.push(thread::spawn(move || {
                let rq = match i % 2 {
                    0 => with_body(request(Verb::Put, "/notes/x", Some(ALICE)), "text/plain", "plain"),
                    _ => with_body(request(Verb::Put, "/notes/x", Some(ALICE)), "text/turtle", "<a> <b> <c> ."),
                };
                process_method(&ldp, &rq).status
            }));
        }
        let statuses: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1);
        assert!(statuses.iter().all(|s| *s == 200 || *s == 201));

        let stored: Vec<String> = read_dir(d.path().join("notes"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| remove_dollar_extension(n) == "x")
            .collect();
        assert_eq!(stored.len(), 1, "{:?}", stored);
    }

    #[test]
    fn test_patch_operations_in_sequence() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let ldp = store(d.path());

        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <x> <y> <z> . } ; DELETE DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 200);
        let data = read(d.path().join("doc.ttl")).unwrap();
        assert_eq!(parse_graph(&data, &url("/doc.ttl"), TURTLE).unwrap().len(), 1);

        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <d> <e> <f> . } ; DELETE DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 409);
        assert_eq!(read(d.path().join("doc.ttl")).unwrap(), data);
    }

    #[test]
    fn test_patch_while_locked() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let mut ldp = store(d.path());
        ldp.locks = LockManager::with_policy(&d.path().join(LOCK_DIR), DEFAULT_STALE_AFTER, 1, Duration::from_millis(5));

        let held = ldp.locks.acquire(&d.path().join("doc.ttl")).unwrap();
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 503);
        let rq = with_body(request(Verb::Put, "/doc.ttl", Some(ALICE)), "text/plain", "replaced");
        assert_eq!(process_method(&ldp, &rq).status, 503);
        assert_eq!(read(d.path().join("doc.ttl")).unwrap(), b"<a> <b> <c> .".to_vec());

        held.release().unwrap();
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 200);
    }

    #[test]
    fn test_patch_breaks_stale_lock() {
        let d = tempdir().unwrap();
        owner_acl(d.path());
        write(d.path().join("doc.ttl"), "<a> <b> <c> .").unwrap();
        let mut ldp = store(d.path());
        ldp.locks = LockManager::with_policy(&d.path().join(LOCK_DIR), Duration::from_millis(20), 3, Duration::from_millis(10));

        let abandoned = ldp.locks.acquire(&d.path().join("doc.ttl")).unwrap();
        thread::sleep(Duration::from_millis(40));
        let rq = with_body(request(Verb::Patch, "/doc.ttl", Some(ALICE)), "application/sparql-update", "INSERT DATA { <x> <y> <z> . }");
        assert_eq!(process_method(&ldp, &rq).status, 200);
        let data = read(d.path().join("doc.ttl")).unwrap();
        assert_eq!(parse_graph(&data, &url("/doc.ttl"), TURTLE).unwrap().len(), 2);

        // the broken holder learns its lock was taken over
        assert_eq!(abandoned.release().unwrap_err().status(), 500);
    }
}
