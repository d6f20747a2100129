//! Environment-driven configuration.
//!
//! All variables are optional and carry the `HGJ_` prefix; values from the
//! environment override the built-in defaults. The service reads this once at
//! startup; per-job constraint bodies always win over these defaults.

use std::net::SocketAddr;

use crate::model::Constraints;
use crate::Mm;

/// Built-in fallbacks, used when neither the environment nor the request
/// provides a value.
pub const DEFAULT_WASTE_THRESHOLD_MM: Mm = 200.0;
pub const DEFAULT_TARGET_LOSS_RATE: f64 = 5.0;
pub const DEFAULT_TIME_LIMIT_MS: u64 = 30_000;
pub const DEFAULT_MAX_WELDING_SEGMENTS: u32 = 3;
pub const DEFAULT_WELD_COST_MM: Mm = 50.0;
pub const DEFAULT_SWAP_BENEFIT_FLOOR_MM: Mm = 50.0;

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP task API.
    pub addr: SocketAddr,
    /// Connection string for a persistent task store, when one is wired in.
    /// The in-process store ignores it; it is logged at startup so operators
    /// can see which backend a deployment points at.
    pub database_url: Option<String>,
    pub waste_threshold: Mm,
    pub target_loss_rate: f64,
    pub time_limit: u64,
    pub max_welding_segments: u32,
    pub weld_cost_mm: Mm,
    pub swap_benefit_floor_mm: Mm,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_url: None,
            waste_threshold: DEFAULT_WASTE_THRESHOLD_MM,
            target_loss_rate: DEFAULT_TARGET_LOSS_RATE,
            time_limit: DEFAULT_TIME_LIMIT_MS,
            max_welding_segments: DEFAULT_MAX_WELDING_SEGMENTS,
            weld_cost_mm: DEFAULT_WELD_COST_MM,
            swap_benefit_floor_mm: DEFAULT_SWAP_BENEFIT_FLOOR_MM,
        }
    }
}

impl Config {
    /// Read the `HGJ_*` environment, falling back to defaults per variable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            addr: env_parse("HGJ_ADDR").unwrap_or(d.addr),
            database_url: std::env::var("HGJ_DATABASE_URL").ok(),
            waste_threshold: env_parse("HGJ_WASTE_THRESHOLD").unwrap_or(d.waste_threshold),
            target_loss_rate: env_parse("HGJ_TARGET_LOSS_RATE").unwrap_or(d.target_loss_rate),
            time_limit: env_parse("HGJ_TIME_LIMIT").unwrap_or(d.time_limit),
            max_welding_segments: env_parse("HGJ_MAX_WELDING_SEGMENTS")
                .unwrap_or(d.max_welding_segments),
            weld_cost_mm: env_parse("HGJ_WELD_COST_MM").unwrap_or(d.weld_cost_mm),
            swap_benefit_floor_mm: env_parse("HGJ_SWAP_BENEFIT_FLOOR_MM")
                .unwrap_or(d.swap_benefit_floor_mm),
        }
    }

    /// Default constraint set for jobs submitted without one.
    pub fn default_constraints(&self) -> Constraints {
        Constraints {
            waste_threshold: self.waste_threshold,
            target_loss_rate: self.target_loss_rate,
            time_limit: self.time_limit,
            max_welding_segments: self.max_welding_segments,
            max_iterations_per_demand: None,
            weld_cost_mm: self.weld_cost_mm,
            swap_benefit_floor_mm: self.swap_benefit_floor_mm,
        }
    }
}
