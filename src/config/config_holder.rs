use super::toml::ConfigToml;
use anyhow::{Context as _, bail};
use config::{ConfigBuilder, Environment, File, FileFormat, builder::AsyncState};
use directories::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt as _;
use tracing::{info, warn};

pub(crate) const GENERATED_TOML: &str = include_str!("../../run-notifier.toml");
pub(crate) const CONFIG_FILE_NAME: &str = "run-notifier.toml";
const ENV_PREFIX: &str = "run_notifier";

// Path prefixes
const HOME_DIR_PREFIX: &str = "~/";
pub(crate) const DATA_DIR_PREFIX: &str = "${DATA_DIR}/";
const CACHE_DIR_PREFIX: &str = "${CACHE_DIR}/";
const CONFIG_DIR_PREFIX: &str = "${CONFIG_DIR}/";
const TEMP_DIR_PREFIX: &str = "${TEMP_DIR}/";

pub(crate) struct PathPrefixes {
    pub(crate) project_dirs: Option<ProjectDirs>,
    pub(crate) base_dirs: Option<BaseDirs>,
}

impl PathPrefixes {
    pub(crate) fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("", "", "run-notifier"),
            base_dirs: BaseDirs::new(),
        }
    }

    pub(crate) fn replace_path_prefix(&self, input_path: &str) -> PathBuf {
        if let Some(suffix) = input_path.strip_prefix(TEMP_DIR_PREFIX) {
            return std::env::temp_dir().join(suffix);
        }
        if let (Some(project_dirs), Some(base_dirs)) = (&self.project_dirs, &self.base_dirs) {
            if let Some(suffix) = input_path.strip_prefix(HOME_DIR_PREFIX) {
                base_dirs.home_dir().join(suffix)
            } else if let Some(suffix) = input_path.strip_prefix(DATA_DIR_PREFIX) {
                project_dirs.data_dir().join(suffix)
            } else if let Some(suffix) = input_path.strip_prefix(CACHE_DIR_PREFIX) {
                project_dirs.cache_dir().join(suffix)
            } else if let Some(suffix) = input_path.strip_prefix(CONFIG_DIR_PREFIX) {
                project_dirs.config_dir().join(suffix)
            } else {
                PathBuf::from(input_path)
            }
        } else {
            if [
                HOME_DIR_PREFIX,
                DATA_DIR_PREFIX,
                CACHE_DIR_PREFIX,
                CONFIG_DIR_PREFIX,
            ]
            .iter()
            .any(|prefix| input_path.starts_with(prefix))
            {
                warn!("Not expanding prefix of `{input_path}`");
            }
            PathBuf::from(input_path)
        }
    }

    /// Expand the prefix of a file path and create its parent directory.
    pub(crate) async fn replace_file_prefix_mkdir(
        &self,
        input_path: &str,
    ) -> Result<PathBuf, anyhow::Error> {
        let path = self.replace_path_prefix(input_path);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdir(parent).await?;
        }
        Ok(path)
    }

    pub(crate) async fn replace_path_prefix_mkdir(
        &self,
        dir: &str,
    ) -> Result<PathBuf, anyhow::Error> {
        let path = self.replace_path_prefix(dir);
        mkdir(&path).await?;
        Ok(path)
    }
}

async fn mkdir(path: &Path) -> Result<(), anyhow::Error> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create directory {path:?}"))
}

pub(crate) struct ConfigHolder {
    config_toml: Option<PathBuf>,
    pub(crate) path_prefixes: PathPrefixes,
}

impl ConfigHolder {
    pub(crate) async fn generate_default_config(
        dst: Option<PathBuf>,
        overwrite: bool,
    ) -> Result<(), anyhow::Error> {
        let dst = dst.unwrap_or(PathBuf::from(CONFIG_FILE_NAME));

        let mut file = OpenOptions::new()
            .write(true)
            .create(true) // Always allow creating new files.
            .truncate(true) // Truncate existing files.
            .create_new(!overwrite) // if true, `create` is ignored, and only new file creation is allowed, meaning overwriting is disabled.
            .open(&dst)
            .await
            .with_context(|| {
                format!(
                    "cannot open {dst:?} for writing{}",
                    if !overwrite {
                        ", try using `--overwrite`"
                    } else {
                        ""
                    }
                )
            })?;
        file.write_all(GENERATED_TOML.as_bytes())
            .await
            .with_context(|| format!("cannot write to {dst:?}"))?;
        println!("Generated {dst:?}");

        Ok(())
    }

    /// Use the explicit path, or `run-notifier.toml` from the current
    /// directory when it exists. A missing default file is not an error:
    /// defaults and environment variables still apply.
    pub(crate) fn new(config: Option<PathBuf>) -> Result<Self, anyhow::Error> {
        let config_toml = if let Some(config) = config {
            if !config.try_exists().unwrap_or_default() {
                bail!("configuration file {config:?} does not exist");
            }
            Some(config)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.try_exists().unwrap_or_default() {
                info!("Using configuration file {local:?}");
                Some(local)
            } else {
                None
            }
        };
        Ok(Self {
            config_toml,
            path_prefixes: PathPrefixes::new(),
        })
    }

    pub(crate) async fn load_config(&self) -> Result<ConfigToml, anyhow::Error> {
        let mut builder = ConfigBuilder::<AsyncState>::default();
        if let Some(config_toml) = self.config_toml.as_deref() {
            builder = builder.add_source(
                File::from(config_toml)
                    .required(true)
                    .format(FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .await?;
        Ok(settings.try_deserialize()?)
    }
}
