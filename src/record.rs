use std::fs::{
    self,
    File,
};
use std::io::{
    self,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::time::UNIX_EPOCH;

use log::{
    debug,
    error,
};
use sha2::{
    Digest,
    Sha256,
};
use tempfile::NamedTempFile;

use crate::error::LdpError;

/// A stored representation.
#[derive(Debug)]
pub struct Record {
    pub digest: Vec<u8>,
    pub path: PathBuf,
    pub size: usize,
}

impl Record {
    /// Strong entity tag for the stored bytes.
    pub fn etag(&self) -> String {
        format!("\"{}\"", hex::encode(&self.digest))
    }
}

pub struct Stat {
    pub is_container: bool,
    pub size: u64,
    pub mtime: u64,
}

pub fn stat(path: &Path) -> Result<Stat, LdpError> {
    let meta = fs::metadata(path)?;
    let mtime = match meta.modified() {
        Ok(v) => v.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
        Err(_) => 0,
    };
    Ok(Stat {
        is_container: meta.is_dir(),
        size: meta.len(),
        mtime,
    })
}

struct Spool {
    tempfile: NamedTempFile,
    record: Record,
}

fn spool(path: &Path, mut f: impl Read, expected_size: usize) -> Result<Spool, LdpError> {
    let dir = match path.parent() {
        Some(v) => v,
        None => {
            return Err(LdpError::Internal(format!("{:?} has no parent directory", path)));
        },
    };
    let mut tempfile = match NamedTempFile::new_in(dir) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot create tempfile in {:?}: {}", dir, e);
            return Err(LdpError::internal("Error writing data", e));
        },
    };
    debug!("writing to tempfile {:?} expected size {}", tempfile.path(), expected_size);

    let mut buf: [u8; 65535] = [0; 65535];
    let mut h = Sha256::new();
    let mut total_size: usize = 0;
    loop {
        let n = match f.read(&mut buf[..]) {
            Ok(0) => break,
            Ok(v) => v,
            Err(e) => {
                error!("cannot read request body: {}", e);
                return Err(LdpError::BadRequest(format!("cannot read request body: {}", e)));
            },
        };
        total_size += n;
        h.update(&buf[..n]);
        if let Err(e) = tempfile.write_all(&buf[..n]) {
            return Err(LdpError::internal("Error writing data", e));
        }
    }
    if expected_size > 0 && expected_size != total_size {
        return Err(LdpError::BadRequest(format!("expected {} bytes, got {}", expected_size, total_size)));
    }
    if let Err(e) = tempfile.as_file().sync_all() {
        return Err(LdpError::internal("Error writing data", e));
    }
    Ok(Spool {
        tempfile,
        record: Record {
            digest: h.finalize().to_vec(),
            path: path.to_path_buf(),
            size: total_size,
        },
    })
}

/// Writes the content of `f` to `path` as one atomic replace.
///
/// The content is spooled to a temporary file in the target directory and
/// renamed over `path`, so readers see either the old or the new bytes.
///
/// # Arguments
///
/// * `path` - Final storage location.
/// * `f` - Reader providing the content body.
/// * `expected_size` - Size hint for the content body, zero if unknown.
pub fn put(path: &Path, f: impl Read, expected_size: usize) -> Result<Record, LdpError> {
    let spooled = spool(path, f, expected_size)?;
    if let Err(e) = spooled.tempfile.persist(path) {
        return Err(LdpError::internal("Error writing data", e.error));
    }
    debug!("wrote {} bytes to {:?}", spooled.record.size, path);
    Ok(spooled.record)
}

/// Like [put], but never replaces an existing file.
///
/// Returns `None` and leaves `path` untouched if something is already stored there.
pub fn put_new(path: &Path, f: impl Read, expected_size: usize) -> Result<Option<Record>, LdpError> {
    let spooled = spool(path, f, expected_size)?;
    match spooled.tempfile.persist_noclobber(path) {
        Ok(_) => {
            debug!("created {:?} with {} bytes", path, spooled.record.size);
            Ok(Some(spooled.record))
        },
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!("{:?} already exists", path);
            Ok(None)
        },
        Err(e) => Err(LdpError::internal("Error writing data", e.error)),
    }
}

pub fn get(path: &Path) -> Result<File, LdpError> {
    match File::open(path) {
        Ok(f) => Ok(f),
        Err(e) => Err(e.into()),
    }
}

pub fn read(path: &Path) -> Result<Vec<u8>, LdpError> {
    Ok(fs::read(path)?)
}

/// Creates `path` and any missing ancestors. Returns whether anything was created.
pub fn create_container(path: &Path) -> Result<bool, LdpError> {
    if path.is_dir() {
        return Ok(false);
    }
    match fs::create_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) => Err(LdpError::internal("Failed to create the path to the new resource", e)),
    }
}

/// Creates the single directory `path`. Returns false if it already exists.
pub fn create_new_container(path: &Path) -> Result<bool, LdpError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LdpError::internal("Failed to create the new container", e)),
    }
}

pub fn remove(path: &Path) -> Result<(), LdpError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) => Err(LdpError::internal("Failed to delete resource", e)),
    }
}

pub fn remove_container(path: &Path) -> Result<(), LdpError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) => Err(LdpError::internal("Failed to delete the container", e)),
    }
}

/// Entry names of a container directory, sorted.
pub fn list(path: &Path) -> Result<Vec<String>, LdpError> {
    let entries = match fs::read_dir(path) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::internal("Can't read container", e));
        },
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}
