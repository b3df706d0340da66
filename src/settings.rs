use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{errors::SGError, refinement::predictive::{ScanMode, DEFAULT_BLOCK_SIZE}};

///
/// Settings of a refinement driver. Every field has a default, so an empty
/// file is a valid configuration.
///
/// Loaded from a TOML or JSON file; environment variables prefixed with
/// `SGREFINE_` override file values, nested fields use `__` as separator
/// (`SGREFINE_COARSENING__THRESHOLD=0.1`).
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSettings
{
    /// Points (or subspaces) created per round.
    #[serde(default = "default_one")]
    pub refinements_num: usize,
    #[serde(default)]
    pub threshold: f64,
    /// Predictive indicator values are zero below this many support rows.
    #[serde(default)]
    pub min_support_points: usize,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Per dimension level limit. Dimensions past the end are unlimited.
    pub level_limits: Option<Vec<u8>>,
    pub max_level_sum: Option<u32>,
    #[serde(default)]
    pub coarsening: CoarseningSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoarseningSettings
{
    #[serde(default)]
    pub removements_num: usize,
    #[serde(default)]
    pub threshold: f64,
}

impl Default for RefinementSettings
{
    fn default() -> Self {
        Self {
            refinements_num: default_one(),
            threshold: 0.0,
            min_support_points: 0,
            scan_mode: ScanMode::default(),
            block_size: default_block_size(),
            level_limits: None,
            max_level_sum: None,
            coarsening: CoarseningSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl RefinementSettings
{
    ///
    /// Read settings from `path` (format from the file extension) and apply
    /// `SGREFINE_*` environment overrides.
    ///
    pub fn from_file(path: &str) -> Result<Self, SGError>
    {
        let parsed = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SGREFINE").prefix_separator("_").separator("__").try_parsing(true))
            .build()
            .map_err(|_| SGError::InvalidConfiguration)?;
        let settings: Self = parsed.try_deserialize().map_err(|_| SGError::InvalidConfiguration)?;
        settings.validate()?;
        info!("refinement settings loaded from {}", path);
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SGError>
    {
        let parsed = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .map_err(|_| SGError::InvalidConfiguration)?;
        let settings: Self = parsed.try_deserialize().map_err(|_| SGError::InvalidConfiguration)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SGError>
    {
        let limits_valid = self.level_limits.as_ref().map_or(true, |limits| limits.iter().all(|&l| (1..32).contains(&l)));
        if self.block_size == 0 || !self.threshold.is_finite() || !self.coarsening.threshold.is_finite() || !limits_valid
        {
            return Err(SGError::InvalidConfiguration);
        }
        Ok(())
    }
}

// *********************************
// Default values for deserializing
// *********************************
fn default_one() -> usize
{
    1
}

fn default_block_size() -> usize
{
    DEFAULT_BLOCK_SIZE
}

fn default_log_level() -> String
{
    "info".to_string()
}

#[test]
fn check_empty_settings_use_defaults()
{
    let settings = RefinementSettings::from_toml_str("").unwrap();
    assert_eq!(settings, RefinementSettings::default());
    assert_eq!(settings.refinements_num, 1);
    assert_eq!(settings.block_size, 1024);
    assert_eq!(settings.scan_mode, ScanMode::Full);
    assert_eq!(settings.log_level, "info");
}

#[test]
fn check_settings_from_toml()
{
    let content = r#"
        refinements_num = 8
        threshold = 0.001
        min_support_points = 3
        scan_mode = "online"
        block_size = 256
        level_limits = [4, 6]

        [coarsening]
        removements_num = 2
        threshold = 0.5
    "#;
    let settings = RefinementSettings::from_toml_str(content).unwrap();
    assert_eq!(settings.refinements_num, 8);
    assert_eq!(settings.min_support_points, 3);
    assert_eq!(settings.scan_mode, ScanMode::Online);
    assert_eq!(settings.block_size, 256);
    assert_eq!(settings.level_limits, Some(vec![4, 6]));
    assert_eq!(settings.max_level_sum, None);
    assert_eq!(settings.coarsening, CoarseningSettings { removements_num: 2, threshold: 0.5 });
}

#[test]
fn check_invalid_settings()
{
    assert_eq!(RefinementSettings::from_toml_str("block_size = 0"), Err(SGError::InvalidConfiguration));
    assert_eq!(RefinementSettings::from_toml_str("level_limits = [0]"), Err(SGError::InvalidConfiguration));
    assert_eq!(RefinementSettings::from_toml_str("scan_mode = \"sideways\""), Err(SGError::InvalidConfiguration));
    assert_eq!(RefinementSettings::from_toml_str("refinements_num = ["), Err(SGError::InvalidConfiguration));
}
