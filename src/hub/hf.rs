use std::path::{Path, PathBuf};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Cache, CacheRepo, Repo, RepoType};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::{
    has_weights, CausalLm, HubError, LoadedModel, ModelConfig, ModelHub, ModelLocation,
    CONFIG_FILE, TOKENIZER_COMPANIONS, TOKENIZER_FILE,
};
use crate::config::HubSettings;
use crate::export::walk_files;
use crate::tokenizer::TokenizerBundle;

/// Hub repository ids: `name` or `org/name`
static REPO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9][A-Za-z0-9._-]*/)?[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap()
});

/// Checks that `repo_id` can name a hub repository.
pub fn validate_repo_id(repo_id: &str) -> Result<(), HubError> {
    if REPO_ID.is_match(repo_id) && !repo_id.contains("..") {
        Ok(())
    } else {
        Err(HubError::InvalidModelId(repo_id.to_string()))
    }
}

/// Thin wrapper over the `hf-hub` sync client and its on-disk cache.
#[derive(Debug, Clone)]
pub struct HubClient {
    /// Custom cache directory; the hub default is used when absent
    pub cache_dir: Option<PathBuf>,
    /// Access token for gated or private repositories
    pub token: Option<String>,
    /// Revision every request is pinned to
    pub revision: String,
    /// Only consult the local cache
    pub offline: bool,
}

/// A repository opened either against the network or the cache only
enum RepoHandle {
    Online(ApiRepo),
    Offline(CacheRepo),
}

impl HubClient {
    pub fn from_settings(settings: &HubSettings, revision: &str) -> Self {
        Self {
            cache_dir: settings.cache.clone(),
            token: Self::resolve_token(settings.token.as_deref()),
            revision: revision.to_string(),
            offline: settings.offline,
        }
    }

    /// Explicit token first, then the HF_TOKEN environment variable.
    pub fn resolve_token(explicit: Option<&str>) -> Option<String> {
        if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
        std::env::var("HF_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn repo(&self, repo_id: &str) -> Repo {
        Repo::with_revision(repo_id.to_string(), RepoType::Model, self.revision.clone())
    }

    fn api(&self, repo_id: &str) -> Result<Api, HubError> {
        let mut builder = ApiBuilder::new();
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        builder.build().map_err(|e| HubError::Download {
            model: repo_id.to_string(),
            message: format!("failed to initialize hub client: {}", e),
        })
    }

    fn cache(&self) -> Cache {
        match &self.cache_dir {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        }
    }

    fn open(&self, repo_id: &str) -> Result<RepoHandle, HubError> {
        if self.offline {
            Ok(RepoHandle::Offline(self.cache().repo(self.repo(repo_id))))
        } else {
            Ok(RepoHandle::Online(self.api(repo_id)?.repo(self.repo(repo_id))))
        }
    }

    /// Every file name in the repository at the pinned revision.
    ///
    /// Offline there is no listing to consult, so the result is empty.
    pub fn list_files(&self, repo_id: &str) -> Result<Vec<String>, HubError> {
        match self.open(repo_id)? {
            RepoHandle::Offline(_) => Ok(Vec::new()),
            RepoHandle::Online(repo) => {
                let info = repo.info().map_err(|e| download_error(repo_id, e))?;
                Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
            }
        }
    }

    /// Local path of `file`, downloading it into the cache first when online.
    pub fn fetch(&self, repo_id: &str, file: &str) -> Result<PathBuf, HubError> {
        match self.open(repo_id)? {
            RepoHandle::Offline(cache) => cache.get(file).ok_or_else(|| HubError::NotCached {
                model: repo_id.to_string(),
                file: file.to_string(),
            }),
            RepoHandle::Online(repo) => {
                debug!("Fetching {} from {}@{}", file, repo_id, self.revision);
                repo.get(file).map_err(|e| {
                    if e.to_string().contains("404") {
                        HubError::MissingFile {
                            model: repo_id.to_string(),
                            file: file.to_string(),
                        }
                    } else {
                        download_error(repo_id, e)
                    }
                })
            }
        }
    }
}

fn download_error(repo_id: &str, err: impl std::fmt::Display) -> HubError {
    HubError::Download {
        model: repo_id.to_string(),
        message: err.to_string(),
    }
}

/// Model hub backed by the Hugging Face Hub, with local directories
/// accepted as checkpoints too.
#[derive(Debug, Clone)]
pub struct HfHub {
    client: HubClient,
}

impl HfHub {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HubClient {
        &self.client
    }

    fn load_local(&self, model_id: &str, dir: &Path) -> Result<LoadedModel, HubError> {
        info!("Loading checkpoint from local directory {}", dir.display());

        let require = |file: &str| -> Result<PathBuf, HubError> {
            let path = dir.join(file);
            if path.is_file() {
                Ok(path)
            } else {
                Err(HubError::MissingFile {
                    model: model_id.to_string(),
                    file: file.to_string(),
                })
            }
        };

        let config_path = require(CONFIG_FILE)?;
        let tokenizer_path = require(TOKENIZER_FILE)?;

        let config = ModelConfig::from_file(&config_path)?;
        config.ensure_causal_lm()?;

        let files: Vec<String> = walk_files(dir)?
            .iter()
            .filter_map(|p| p.strip_prefix(dir).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        if !has_weights(&files) {
            return Err(HubError::Incompatible(format!(
                "{} contains no weight files",
                dir.display()
            )));
        }

        let mut tokenizer = TokenizerBundle::from_file(&tokenizer_path)
            .map_err(|e| HubError::Tokenizer(e.to_string()))?;
        for companion in TOKENIZER_COMPANIONS {
            let path = dir.join(companion);
            if path.is_file() {
                tokenizer = tokenizer.with_companion(*companion, path);
            }
        }

        Ok(LoadedModel {
            model_id: model_id.to_string(),
            model: CausalLm {
                config,
                location: ModelLocation::Local { dir: dir.to_path_buf() },
            },
            tokenizer,
        })
    }

    fn load_remote(&self, repo_id: &str) -> Result<LoadedModel, HubError> {
        let offline = self.client.offline;
        info!(
            "Resolving {}@{} from the hub{}",
            repo_id,
            self.client.revision,
            if offline { " cache" } else { "" }
        );

        let files = self.client.list_files(repo_id)?;
        if !offline {
            for required in [CONFIG_FILE, TOKENIZER_FILE] {
                if !files.iter().any(|f| f == required) {
                    return Err(HubError::MissingFile {
                        model: repo_id.to_string(),
                        file: required.to_string(),
                    });
                }
            }
            if !has_weights(&files) {
                return Err(HubError::Incompatible(format!(
                    "{} publishes no weight files",
                    repo_id
                )));
            }
        }

        let config_path = self.client.fetch(repo_id, CONFIG_FILE)?;
        let config = ModelConfig::from_file(&config_path)?;
        config.ensure_causal_lm()?;

        let tokenizer_path = self.client.fetch(repo_id, TOKENIZER_FILE)?;
        let mut tokenizer = TokenizerBundle::from_file(&tokenizer_path)
            .map_err(|e| HubError::Tokenizer(e.to_string()))?;

        for companion in TOKENIZER_COMPANIONS {
            let listed = files.iter().any(|f| f == companion);
            if !offline && !listed {
                continue;
            }
            match self.client.fetch(repo_id, companion) {
                Ok(path) => tokenizer = tokenizer.with_companion(*companion, path),
                // Companions are optional; a cache miss offline is expected
                Err(HubError::NotCached { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let snapshot_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(LoadedModel {
            model_id: repo_id.to_string(),
            model: CausalLm {
                config,
                location: ModelLocation::Hub {
                    repo_id: repo_id.to_string(),
                    revision: self.client.revision.clone(),
                    snapshot_dir,
                    files,
                    offline,
                },
            },
            tokenizer,
        })
    }
}

impl ModelHub for HfHub {
    fn load(&self, model_id: &str) -> Result<LoadedModel, HubError> {
        let path = Path::new(model_id);
        if path.is_dir() {
            return self.load_local(model_id, path);
        }
        validate_repo_id(model_id)?;
        self.load_remote(model_id)
    }
}
