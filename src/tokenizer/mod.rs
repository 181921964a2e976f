use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::debug;

/// Errors raised while loading or persisting tokenizer artifacts
#[derive(Debug)]
pub enum TokenizerError {
    /// The tokenizers library rejected the file or failed to serialize
    Library(String),
    /// Target exists but is not a directory
    NotADirectory(PathBuf),
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenizerError::Library(msg) => write!(f, "Tokenizer error: {}", msg),
            TokenizerError::NotADirectory(path) => {
                write!(f, "{} exists and is not a directory", path.display())
            }
            TokenizerError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for TokenizerError {}

impl From<std::io::Error> for TokenizerError {
    fn from(err: std::io::Error) -> Self {
        TokenizerError::IoError(err)
    }
}

/// A loaded tokenizer plus the auxiliary files that travel with it.
#[derive(Debug, Clone)]
pub struct TokenizerBundle {
    pub tokenizer: Tokenizer,
    /// (file name, source path) pairs copied verbatim on save
    pub companions: Vec<(String, PathBuf)>,
}

impl TokenizerBundle {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer, companions: Vec::new() }
    }

    /// Loads `tokenizer.json` through the tokenizers library.
    pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| TokenizerError::Library(e.to_string()))?;
        Ok(Self::new(tokenizer))
    }

    pub fn with_companion(mut self, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        self.companions.push((name.into(), source.into()));
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Writes the tokenizer into `dir`, replacing whatever was there.
    ///
    /// Returns the files written.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>, TokenizerError> {
        if dir.exists() {
            if !dir.is_dir() {
                return Err(TokenizerError::NotADirectory(dir.to_path_buf()));
            }
            // Stale files from an earlier export must not survive
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(self.companions.len() + 1);

        let tokenizer_path = dir.join(crate::hub::TOKENIZER_FILE);
        self.tokenizer
            .save(&tokenizer_path, true)
            .map_err(|e| TokenizerError::Library(e.to_string()))?;
        written.push(tokenizer_path);

        for (name, source) in &self.companions {
            let target = dir.join(name);
            fs::copy(source, &target)?;
            debug!("Copied tokenizer companion {} -> {}", source.display(), target.display());
            written.push(target);
        }

        Ok(written)
    }
}
