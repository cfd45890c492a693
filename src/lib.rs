//! # Thermal Governor
//!
//! Closed-loop CPU frequency governor for battery-powered devices: keeps the
//! battery temperature inside a comfort band by shifting between a small set
//! of CPU frequency "gears".
//!
//! ## Architecture
//!
//! - **Hardware**: temperature sensing and gear actuation behind two traits,
//!   with a sysfs backend for real devices and a simulated plant for testing
//! - **Decision engine**: either a tabular Q-learning agent with a persisted
//!   policy, or a trend forecaster mapped through temperature thresholds
//! - **Arbitration**: cooldown between shifts, emergency bypass to gear 1
//! - **Driver**: the periodic control loop with safe shutdown
//! - **Simulation**: the same loop on a virtual clock against the simulated
//!   plant, leaving the configured policy untouched
//!
//! ## Example
//!
//! ```no_run
//! use thermal_governor::{ControlLoop, GovernorConfig, SysfsBackend};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GovernorConfig::default();
//!     let backend = SysfsBackend::new(&config.sysfs)?;
//!     let mut governor = ControlLoop::new(config, backend)?;
//!
//!     governor
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod arbitration;
pub mod driver;
pub mod engine;
pub mod error;
pub mod forecaster;
pub mod hardware;
pub mod history;
pub mod policy_store;
pub mod simulation;
pub mod types;

pub use types::*;

pub use agent::{QAgent, ValueTable};
pub use arbitration::{GearArbiter, ShiftDecision, ShiftReason};
pub use driver::{ControlLoop, CycleReport, LoopStatistics};
pub use engine::{DecisionEngine, Recommendation};
pub use error::{GovernorError, Result, Severity};
pub use forecaster::{Forecaster, LinearVelocityModel};
pub use hardware::{GearActuator, SimulatedDevice, SysfsBackend, TemperatureSource};
pub use history::TemperatureHistory;
pub use policy_store::PolicyStore;
pub use simulation::{simulate, SimulationOptions, SimulationReport};
