//! Maps request URLs onto storage locations and back.
//!
//! Files whose extension does not match the content type they were stored
//! with carry a `$.<ext>` companion extension on disk, e.g. a turtle document
//! at `/profile/card` is kept as `profile/card$.ttl`. The companion extension
//! never shows up in URLs, which keeps the mapping reversible.
use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;

use log::debug;
use mime::Mime;
use percent_encoding::{
    percent_decode_str,
    utf8_percent_encode,
    AsciiSet,
    CONTROLS,
};
use url::Url;

use crate::error::LdpError;

pub const ACL_SUFFIX: &str = ".acl";
pub const META_SUFFIX: &str = ".meta";

/// Directory under the storage root holding lock files. Never exposed as a resource.
pub const LOCK_DIR: &str = ".ldp-locks";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_CONTAINER_CONTENT_TYPE: &str = "text/turtle";

const DOLLAR: &str = "$.";
const UNKNOWN_EXTENSION: &str = "unknown";

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// First extension listed for a type is its canonical extension.
const TYPES: &[(&str, &str)] = &[
    ("ttl", "text/turtle"),
    ("acl", "text/turtle"),
    ("meta", "text/turtle"),
    ("n3", "text/n3"),
    ("nt", "application/n-triples"),
    ("nq", "application/n-quads"),
    ("jsonld", "application/ld+json"),
    ("rdf", "application/rdf+xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xhtml", "application/xhtml+xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("bin", "application/octet-stream"),
];

/// Result of resolving a URL to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub path: PathBuf,
    pub content_type: String,
    pub is_container: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MapOptions<'a> {
    pub content_type: Option<&'a str>,
    pub create_if_not_exists: bool,
}

struct Target {
    hostname: String,
    segments: Vec<String>,
    is_container: bool,
}

pub struct ResourceMapper {
    root_path: PathBuf,
    scheme: String,
    host: String,
    port: String,
    root_pathname: String,
    include_host: bool,
}

/// Strips parameters from a media type, `text/turtle; charset=utf-8` becomes `text/turtle`.
pub fn media_type(content_type: &str) -> Option<String> {
    match Mime::from_str(content_type.trim()) {
        Ok(m) => Some(m.essence_str().to_lowercase()),
        Err(_) => None,
    }
}

pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    TYPES.iter().find(|(e, _)| *e == ext).map(|(_, t)| *t)
}

pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    TYPES.iter().find(|(_, t)| *t == content_type).map(|(e, _)| *e)
}

/// Content type implied by the extension of a file or URL path.
pub fn content_type_from_name(name: &str) -> &'static str {
    if name.is_empty() || name.ends_with('/') {
        return DEFAULT_CONTAINER_CONTENT_TYPE;
    }
    let basename = match name.rfind('/') {
        Some(i) => &name[i + 1..],
        None => name,
    };
    match basename.rfind('.') {
        Some(i) if i + 1 < basename.len() => {
            content_type_for_extension(&basename[i + 1..]).unwrap_or(DEFAULT_CONTENT_TYPE)
        },
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// `index$.html` becomes `index`.
pub fn remove_dollar_extension(name: &str) -> &str {
    match name.rfind(DOLLAR) {
        Some(i) if !name[i + DOLLAR.len()..].contains('$') => &name[..i],
        _ => name,
    }
}

/// Path a resource is locked by, shared by all of its representations.
///
/// `card$.ttl` and `card$.txt` both give `card`.
pub fn lock_key(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(remove_dollar_extension(name)),
        None => path.to_path_buf(),
    }
}

fn add_content_type_extension(name: &str, content_type: &str) -> String {
    let from_extension = content_type_from_name(name);
    if from_extension == content_type {
        return name.to_string();
    }
    let ext = extension_for_content_type(content_type).unwrap_or(UNKNOWN_EXTENSION);
    // some extensions fit several types; only switch when it changes the inferred type
    if content_type_for_extension(ext) == Some(from_extension) {
        return name.to_string();
    }
    format!("{}{}{}", name, DOLLAR, ext)
}

/// Percent encodes a single path segment.
pub fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT).to_string()
}

pub fn is_auxiliary(name: &str) -> bool {
    name.ends_with(ACL_SUFFIX) || name.ends_with(META_SUFFIX)
}

pub fn is_container_url(url: &Url) -> bool {
    url.path().ends_with('/')
}

pub fn is_acl_url(url: &Url) -> bool {
    url.path().ends_with(ACL_SUFFIX)
}

fn with_suffix(url: &Url, suffix: &str) -> Result<Url, LdpError> {
    if url.path().ends_with(suffix) {
        return Ok(url.clone());
    }
    let mut s = url.clone();
    s.set_query(None);
    s.set_fragment(None);
    let joined = format!("{}{}", s.as_str(), suffix);
    Url::parse(&joined).map_err(|e| LdpError::internal("cannot build companion url", e))
}

/// URL of the ACL document governing `url` directly.
pub fn acl_url(url: &Url) -> Result<Url, LdpError> {
    with_suffix(url, ACL_SUFFIX)
}

/// URL of the metadata document describing `url`.
pub fn meta_url(url: &Url) -> Result<Url, LdpError> {
    with_suffix(url, META_SUFFIX)
}

/// Resource governed by an ACL document url, `/a/.acl` gives `/a/`.
pub fn acl_subject(url: &Url) -> Option<Url> {
    let s = url.as_str();
    if !s.ends_with(ACL_SUFFIX) {
        return None;
    }
    Url::parse(&s[..s.len() - ACL_SUFFIX.len()]).ok()
}

/// Whether a virtual host name can safely name a storage directory.
///
/// Accepts dns names and bracketed ipv6 literals. Anything that could
/// resolve to another directory, such as `..` or a name with a separator,
/// is refused.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    if let Some(inner) = hostname.strip_prefix('[') {
        return match inner.strip_suffix(']') {
            Some(v) => !v.is_empty() && v.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.'),
            None => false,
        };
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Same location with a trailing slash.
pub fn container_url(url: &Url) -> Url {
    if is_container_url(url) {
        return url.clone();
    }
    let mut u = url.clone();
    let path = format!("{}/", url.path());
    u.set_path(&path);
    u
}

fn hostname_of(url: &Url) -> String {
    url.host_str().unwrap_or("").to_lowercase()
}

impl ResourceMapper {

    pub fn new(root_url: &Url, root_path: &Path, include_host: bool) -> ResourceMapper {
        let port = match root_url.port() {
            Some(v) => format!(":{}", v),
            None => String::new(),
        };
        ResourceMapper {
            root_path: root_path.to_path_buf(),
            scheme: root_url.scheme().to_string(),
            host: hostname_of(root_url),
            port,
            root_pathname: root_url.path().trim_end_matches('/').to_string(),
            include_host,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Storage directory for a virtual host.
    pub fn host_root(&self, hostname: &str) -> Result<PathBuf, LdpError> {
        if !self.include_host {
            return Ok(self.root_path.clone());
        }
        if !is_valid_hostname(hostname) {
            return Err(LdpError::BadRequest(format!("invalid host {}", hostname)));
        }
        Ok(self.root_path.join(hostname))
    }

    /// Absolute URL for a pathname on the given virtual host.
    pub fn resolve_url(&self, hostname: &str, pathname: &str) -> Result<Url, LdpError> {
        let host = if self.include_host { hostname } else { self.host.as_str() };
        if !is_valid_hostname(host) {
            return Err(LdpError::BadRequest(format!("invalid host {}", host)));
        }
        let s = format!("{}://{}{}{}{}", self.scheme, host, self.port, self.root_pathname, pathname);
        Url::parse(&s).map_err(|e| LdpError::BadRequest(format!("invalid url {}: {}", s, e)))
    }

    /// Rebuilds the absolute URL of an incoming request.
    pub fn request_url(&self, host_header: Option<&str>, raw_path: &str) -> Result<Url, LdpError> {
        let pathname = match raw_path.find(|c| c == '?' || c == '#') {
            Some(i) => &raw_path[..i],
            None => raw_path,
        };
        if !pathname.starts_with('/') {
            return Err(LdpError::BadRequest(format!("invalid request path {}", raw_path)));
        }
        let hostname = match host_header {
            Some(v) if v.starts_with('[') => {
                match v.find(']') {
                    Some(i) => v[..=i].to_lowercase(),
                    None => v.to_lowercase(),
                }
            },
            Some(v) => v.split(':').next().unwrap_or("").to_lowercase(),
            None => self.host.clone(),
        };
        let relative = pathname.strip_prefix(self.root_pathname.as_str()).unwrap_or(pathname);
        self.resolve_url(&hostname, relative)
    }

    /// Whether the URL is served by this store rather than fetched remotely.
    pub fn is_local(&self, url: &Url) -> bool {
        if url.scheme() != self.scheme {
            return false;
        }
        let port = match url.port() {
            Some(v) => format!(":{}", v),
            None => String::new(),
        };
        if port != self.port {
            return false;
        }
        if !self.include_host && hostname_of(url) != self.host {
            return false;
        }
        self.relative_pathname(url).is_some()
    }

    fn relative_pathname<'a>(&self, url: &'a Url) -> Option<&'a str> {
        let rest = url.path().strip_prefix(self.root_pathname.as_str())?;
        if rest.is_empty() {
            return Some("/");
        }
        if !rest.starts_with('/') {
            return None;
        }
        Some(rest)
    }

    pub fn is_root(&self, url: &Url) -> bool {
        self.relative_pathname(url) == Some("/")
    }

    /// Container holding `url`, `None` for the store root.
    pub fn parent_container(&self, url: &Url) -> Option<Url> {
        let rest = self.relative_pathname(url)?;
        if rest == "/" {
            return None;
        }
        let trimmed = rest.trim_end_matches('/');
        let i = trimmed.rfind('/')?;
        self.resolve_url(&hostname_of(url), &trimmed[..=i]).ok()
    }

    fn parse_target(&self, url: &Url) -> Result<Target, LdpError> {
        let rest = match self.relative_pathname(url) {
            Some(v) => v,
            None => {
                return Err(LdpError::NotFound(format!("{} is outside of this store", url)));
            },
        };
        let is_container = rest.ends_with('/');
        let mut segments: Vec<String> = vec!();
        for raw in rest[1..].split('/') {
            if raw.is_empty() {
                continue;
            }
            let seg = match percent_decode_str(raw).decode_utf8() {
                Ok(v) => v.to_string(),
                Err(e) => {
                    return Err(LdpError::BadRequest(format!("invalid path segment {}: {}", raw, e)));
                },
            };
            if seg == ".." || seg == "." {
                return Err(LdpError::BadRequest("Disallowed /.. segment in URL".to_string()));
            }
            if seg.contains('/') || seg.contains('\\') || seg.contains('\0') {
                return Err(LdpError::BadRequest(format!("invalid path segment {}", raw)));
            }
            if seg.contains(DOLLAR) {
                return Err(LdpError::BadRequest("Resource with a $.ext is not allowed by the server".to_string()));
            }
            segments.push(seg);
        }
        if segments.first().map(|s| s.as_str()) == Some(LOCK_DIR) {
            return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
        }
        Ok(Target {
            hostname: hostname_of(url),
            segments,
            is_container,
        })
    }

    /// Resolves `url` to a storage location.
    ///
    /// Without `create_if_not_exists` the resource must exist, and its content
    /// type is inferred from the stored file. Otherwise the location a new
    /// representation of the requested content type would be written to is
    /// returned.
    pub fn map_url_to_file(&self, url: &Url, opts: MapOptions) -> Result<Mapping, LdpError> {
        let target = self.parse_target(url)?;
        let mut folder = self.host_root(&target.hostname)?;

        if target.is_container || target.segments.is_empty() {
            for s in target.segments.iter() {
                folder.push(s);
            }
            if !opts.create_if_not_exists && !folder.is_dir() {
                return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
            }
            return Ok(Mapping {
                path: folder,
                content_type: DEFAULT_CONTAINER_CONTENT_TYPE.to_string(),
                is_container: true,
            });
        }

        let (name, parents) = match target.segments.split_last() {
            Some(v) => v,
            None => {
                return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
            },
        };
        for s in parents.iter() {
            folder.push(s);
        }

        if opts.create_if_not_exists {
            let content_type = match opts.content_type.and_then(media_type) {
                Some(v) => v,
                None => DEFAULT_CONTENT_TYPE.to_string(),
            };
            let filename = add_content_type_extension(name, &content_type);
            return Ok(Mapping {
                path: folder.join(filename),
                content_type,
                is_container: false,
            });
        }

        let entries = match fs::read_dir(&folder) {
            Ok(v) => v,
            Err(e) => {
                debug!("cannot read {:?}: {}", folder, e);
                return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
            },
        };
        let mut candidates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|f| remove_dollar_extension(f) == name.as_str())
            .collect();
        candidates.sort();
        let matched = match candidates.iter().find(|f| f.as_str() == name.as_str()) {
            Some(v) => v.clone(),
            None => match candidates.into_iter().next() {
                Some(v) => v,
                None => {
                    return Err(LdpError::NotFound(format!("{} Resource not found", url.path())));
                },
            },
        };
        let path = folder.join(&matched);
        if path.is_dir() {
            return Ok(Mapping {
                path,
                content_type: DEFAULT_CONTAINER_CONTENT_TYPE.to_string(),
                is_container: true,
            });
        }
        Ok(Mapping {
            path,
            content_type: content_type_from_name(&matched).to_string(),
            is_container: false,
        })
    }

    /// Maps a stored file back to its URL on the given virtual host.
    pub fn map_file_to_url(&self, path: &Path, is_container: bool, hostname: &str) -> Result<Url, LdpError> {
        let base = self.host_root(hostname)?;
        let relative = match path.strip_prefix(&base) {
            Ok(v) => v,
            Err(_) => {
                return Err(LdpError::Internal(format!("{:?} is outside of the store", path)));
            },
        };
        let mut names: Vec<String> = vec!();
        for c in relative.components() {
            match c.as_os_str().to_str() {
                Some(v) => names.push(v.to_string()),
                None => {
                    return Err(LdpError::Internal(format!("non utf-8 path {:?}", path)));
                },
            }
        }
        if !is_container {
            if let Some(last) = names.last_mut() {
                *last = remove_dollar_extension(last).to_string();
            }
        }
        let encoded: Vec<String> = names
            .iter()
            .map(|n| encode_segment(n))
            .collect();
        let mut pathname = format!("/{}", encoded.join("/"));
        if is_container && !encoded.is_empty() {
            pathname.push('/');
        }
        self.resolve_url(hostname, &pathname)
    }
}
