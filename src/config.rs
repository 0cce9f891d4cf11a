use anyhow::{Context, Result};
use easytouch_lib::controller::Controller;
use easytouch_lib::protocol::{Dialect, FeatureId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Optional link configuration.
///
/// ```yaml
/// dialect: legacy
/// send_guard: true
/// frame_timeout: 500ms
/// features:
///   pool: 0x10
///   spa_light: 0x11
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LinkConfig {
    #[serde(default)]
    pub dialect: Option<Dialect>,
    #[serde(default = "LinkConfig::default_send_guard")]
    pub send_guard: bool,
    #[serde(default, with = "humantime_serde")]
    pub frame_timeout: Option<Duration>,
    /// Device address per feature name.
    #[serde(default)]
    features: BTreeMap<String, u8>,
}

impl LinkConfig {
    fn default_send_guard() -> bool {
        true
    }

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading link config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open link config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read link config from file: {config_file_path:?}"))?;
        // reject unknown feature names at load time
        config.bindings()?;
        Ok(config)
    }

    pub fn bindings(&self) -> Result<Vec<(FeatureId, u8)>> {
        self.features
            .iter()
            .map(|(name, address)| {
                let feature = name
                    .parse::<FeatureId>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| "Invalid feature in link config")?;
                Ok((feature, *address))
            })
            .collect()
    }

    pub fn apply(&self, controller: &mut Controller) -> Result<()> {
        controller.set_send_guard(self.send_guard);
        for (feature, address) in self.bindings()? {
            log::debug!("Binding {feature} to address 0x{address:02X}");
            controller.bind_feature(feature, address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_config() {
        let file = write_config(
            "dialect: legacy\nsend_guard: false\nframe_timeout: 500ms\nfeatures:\n  pool: 16\n  spa-light: 17\n",
        );
        let config = LinkConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.dialect, Some(Dialect::Legacy));
        assert!(!config.send_guard);
        assert_eq!(config.frame_timeout, Some(Duration::from_millis(500)));
        assert_eq!(
            config.bindings().unwrap(),
            vec![(FeatureId::Pool, 0x10), (FeatureId::SpaLight, 0x11)]
        );
    }

    #[test]
    fn load_defaults() {
        let file = write_config("features: {}\n");
        let config = LinkConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.dialect, None);
        assert!(config.send_guard);
        assert_eq!(config.frame_timeout, None);
        assert!(config.bindings().unwrap().is_empty());
    }

    #[test]
    fn unknown_feature_fails_to_load() {
        let file = write_config("features:\n  hot_tub: 16\n");
        assert!(LinkConfig::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn apply_binds_features() {
        let file = write_config("features:\n  spa_light: 17\n");
        let config = LinkConfig::load(file.path().to_str().unwrap()).unwrap();
        let mut controller = Controller::new(Dialect::Current);
        config.apply(&mut controller).unwrap();
        let frame = controller
            .prepare_command(FeatureId::SpaLight.into(), true)
            .unwrap();
        assert_eq!(frame[4], 0x11);
    }

    #[test]
    fn missing_file_fails() {
        assert!(LinkConfig::load("/nonexistent/easytouch.yaml").is_err());
    }
}
