use crate::config::config_holder::ConfigHolder;
use crate::config::toml::ConfigToml;
use anyhow::Context as _;
use std::path::PathBuf;
use target_store::{ConfigurationStore, TomlFilePersistence};

pub(crate) async fn open_store(
    config: &ConfigToml,
    config_holder: &ConfigHolder,
) -> Result<ConfigurationStore, anyhow::Error> {
    let path = config_holder
        .path_prefixes
        .replace_file_prefix_mkdir(&config.target.file)
        .await?;
    ConfigurationStore::open(TomlFilePersistence::new(&path))
        .with_context(|| format!("cannot load the notification target from {path:?}"))
}

pub(crate) fn check(uri: &str) -> Result<(), anyhow::Error> {
    ConfigurationStore::check(uri)
        .with_context(|| format!("`{uri}` is not a valid notification target"))?;
    println!("`{uri}` is a valid notification target");
    Ok(())
}

pub(crate) async fn get(config: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let config_holder = ConfigHolder::new(config)?;
    let config = config_holder.load_config().await?;
    let store = open_store(&config, &config_holder).await?;
    println!("{}", store.get());
    Ok(())
}

pub(crate) async fn set(uri: &str, config: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let config_holder = ConfigHolder::new(config)?;
    let config = config_holder.load_config().await?;
    let store = open_store(&config, &config_holder).await?;
    store
        .update(uri)
        .with_context(|| format!("cannot set the notification target to `{uri}`"))?;
    println!("Notification target set to {}", store.get());
    Ok(())
}
