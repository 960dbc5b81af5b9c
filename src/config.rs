use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use obj_store::StoreConfig;

pub fn load(path: Option<&Path>) -> Result<StoreConfig> {
    let Some(path) = path else {
        return Ok(StoreConfig::default());
    };
    let config_str = std::fs::read_to_string(path)?;
    let config: StoreConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_yields_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.default_scheme, "file");
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objstr.yaml");
        std::fs::write(
            &path,
            "default_scheme: s3\ns3:\n  region: eu-west-1\n  download_concurrency: 8\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.default_scheme, "s3");
        assert_eq!(config.s3.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.s3.download_concurrency, 8);
        // untouched fields keep their defaults
        assert_eq!(config.copy_buffer_size, obj_store::config::DEFAULT_COPY_BUFFER_SIZE);
    }
}
