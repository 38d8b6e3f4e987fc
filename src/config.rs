//! Platform configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use genealogy_core::schedule::DEFAULT_LEVELS_BPS;
use genealogy_core::{CommissionSchedule, CoreError, Plan};
use referral_module::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    /// Investment plans offered; installed into the store on startup.
    #[serde(default = "default_plans")]
    pub plans: Vec<Plan>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            referral: ReferralConfig::default(),
            plans: default_plans(),
        }
    }
}

impl Config {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            info!("Config file {} not found, using defaults", path.display());
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.referral.schedule()?;
        for plan in &self.plans {
            anyhow::ensure!(
                plan.duration_months > 0,
                "plan {} must last at least one month",
                plan.id
            );
            anyhow::ensure!(
                !plan.monthly_rate.is_sign_negative(),
                "plan {} has a negative monthly rate",
                plan.id
            );
            if let Some(max) = plan.max_amount {
                anyhow::ensure!(
                    max >= plan.min_amount,
                    "plan {} has max_amount below min_amount",
                    plan.id
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("genealogy.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Commission per level in basis points, nearest ancestor first.
    #[serde(default = "default_levels_bps")]
    pub levels_bps: Vec<u32>,

    /// Levels paying less than this are skipped.
    #[serde(default)]
    pub minimum_payout: Decimal,

    /// Default depth of genealogy trees.
    #[serde(default = "default_tree_depth")]
    pub tree_depth: u32,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            levels_bps: default_levels_bps(),
            minimum_payout: Decimal::ZERO,
            tree_depth: default_tree_depth(),
        }
    }
}

impl ReferralConfig {
    pub fn schedule(&self) -> Result<CommissionSchedule, CoreError> {
        CommissionSchedule::new(self.levels_bps.clone(), self.minimum_payout)
    }
}

fn default_levels_bps() -> Vec<u32> {
    DEFAULT_LEVELS_BPS.to_vec()
}

fn default_tree_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_plans() -> Vec<Plan> {
    vec![
        Plan {
            id: "starter".into(),
            name: "Starter".into(),
            monthly_rate: Decimal::new(5, 2),
            duration_months: 6,
            min_amount: Decimal::new(50, 0),
            max_amount: Some(Decimal::new(5_000, 0)),
        },
        Plan {
            id: "growth".into(),
            name: "Growth".into(),
            monthly_rate: Decimal::new(75, 3),
            duration_months: 12,
            min_amount: Decimal::new(1_000, 0),
            max_amount: Some(Decimal::new(50_000, 0)),
        },
        Plan {
            id: "premium".into(),
            name: "Premium".into(),
            monthly_rate: Decimal::new(10, 2),
            duration_months: 24,
            min_amount: Decimal::new(10_000, 0),
            max_amount: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.referral.levels_bps, vec![1_000, 500, 300, 200, 100]);
        assert_eq!(config.referral.tree_depth, 5);
        assert_eq!(config.plans.len(), 3);
        assert_eq!(config.store.path, PathBuf::from("genealogy.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parses_overrides_and_plans() {
        let config: Config = toml::from_str(
            r#"
            [store]
            path = "/var/lib/genealogy/ledger.db"

            [referral]
            levels_bps = [800, 400]
            minimum_payout = "0.50"

            [[plans]]
            id = "flex"
            name = "Flex"
            monthly_rate = "0.04"
            duration_months = 3
            min_amount = "20.00"
            "#,
        )
        .unwrap();
        let schedule = config.referral.schedule().unwrap();
        assert_eq!(schedule.levels(), 2);
        assert_eq!(schedule.minimum_payout(), Decimal::new(50, 2));
        assert_eq!(config.plans.len(), 1);
        assert_eq!(config.plans[0].max_amount, None);
        assert_eq!(config.plans[0].monthly_rate, Decimal::new(4, 2));
    }

    #[test]
    fn rejects_invalid_schedule_and_plans() {
        let mut config = Config::default();
        config.referral.levels_bps = vec![5_000, 5_000];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.plans[0].duration_months = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.plans.len(), 3);
    }
}
