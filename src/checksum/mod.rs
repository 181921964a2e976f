use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use sha2::{Digest, Sha256};

/// Suffix appended to the graph file name to form the sidecar name
pub const SIDECAR_SUFFIX: &str = "sha256";

/// Errors raised while hashing a file or reading its sidecar
#[derive(Debug)]
pub enum ChecksumError {
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
    /// Sidecar content is not a SHA-256 hex digest
    MalformedSidecar(String),
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChecksumError::IoError(e) => write!(f, "I/O error: {}", e),
            ChecksumError::MalformedSidecar(msg) => write!(f, "Malformed checksum file: {}", msg),
        }
    }
}

impl Error for ChecksumError {}

impl From<std::io::Error> for ChecksumError {
    fn from(err: std::io::Error) -> Self {
        ChecksumError::IoError(err)
    }
}

/// Path of the sidecar for `path`: the same name with `.sha256` appended.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Streams `path` through SHA-256 in `chunk_size` reads.
///
/// `on_chunk` is called with the number of bytes consumed after every read,
/// which lets callers drive a progress bar.
pub fn sha256_file_with<F>(path: &Path, chunk_size: usize, mut on_chunk: F) -> Result<String, ChecksumError>
where
    F: FnMut(usize),
{
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        on_chunk(read);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path, chunk_size: usize) -> Result<String, ChecksumError> {
    sha256_file_with(path, chunk_size, |_| {})
}

/// Writes `digest` plus a trailing newline to the sidecar of `path`.
///
/// Returns the sidecar location.
pub fn write_sidecar(path: &Path, digest: &str) -> Result<PathBuf, ChecksumError> {
    let sidecar = sidecar_path(path);
    fs::write(&sidecar, format!("{}\n", digest))?;
    Ok(sidecar)
}

/// Reads the digest stored in the sidecar of `path`.
pub fn read_sidecar(path: &Path) -> Result<String, ChecksumError> {
    let content = fs::read_to_string(sidecar_path(path))?;
    let digest = content.trim();

    // Tolerate `sha256sum` style "<digest>  <file>" lines
    let digest = digest.split_whitespace().next().unwrap_or_default();

    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChecksumError::MalformedSidecar(format!(
            "expected 64 hex characters, got {:?}",
            digest
        )));
    }

    Ok(digest.to_ascii_lowercase())
}

/// Outcome of comparing a file against its sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub expected: String,
    pub actual: String,
}

impl Verification {
    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }
}

/// Re-hashes `path` and compares it with the stored sidecar digest.
pub fn verify(path: &Path, chunk_size: usize) -> Result<Verification, ChecksumError> {
    let expected = read_sidecar(path)?;
    let actual = sha256_file(path, chunk_size)?;
    Ok(Verification { expected, actual })
}
