//! ldpd is a Linked Data Platform server storing resources on the local filesystem.
//!
//! Every url below the server root maps onto a file or directory below the
//! storage root. Directories are served as LDP basic containers, and RDF
//! documents can be fetched in any of the supported serializations and
//! modified in place with SPARQL Update or N3 patches.
//!
//! Access is governed by Web Access Control. A resource is covered by its own
//! `.acl` document or else by the `acl:default` rules of the closest ancestor
//! container carrying one.
//!
//! ## Running the daemon
//!
//! The daemon listens to all ip addresses on port 8443 by default, and stores
//! resources in `./data`. This behavior can be modified by the argument
//! options. See `cargo run -- --help` for details.
//!
//! ## Storing content
//!
//! With a server running on `localhost:8443`, a `PUT` of a turtle document to
//!
//! ``` ignore,
//! http://localhost:8443/profile/card
//! ```
//!
//! is stored as `data/profile/card$.ttl`, and a `GET` with
//! `Accept: application/n-triples` returns it converted to N-Triples.

/// Command line settings.
pub mod arg;

/// Errors carried by every operation, each with its HTTP status.
pub mod error;

/// Url to storage path mapping.
pub mod mapper;

/// Cross-worker locks on storage paths.
pub mod lock;

/// Web Access Control resolution.
pub mod acl;

/// Parsing, serialization and negotiation of RDF documents.
pub mod rdf;

/// SPARQL Update and N3 patches.
pub mod patch;

/// Interfaces single content record storage.
pub mod record;

/// Container listings and `.meta` documents.
pub mod meta;

/// Fetching of documents held by other servers.
pub mod remote;

/// Short lived tokens bound to caller data.
pub mod token;

/// Pluggable HTTP authentication schemes.
pub mod auth;

/// Shared state of a running store.
pub mod ldp;

/// Encapsulates an incoming remote request.
pub mod request;

/// Verb handlers.
pub mod handlers;

/// Encapsulates an outgoing response to remote.
pub mod response;
