//! Quay boot and power configuration.
//!
//! The configuration is a stack of TOML layers merged on top of the
//! compiled-in defaults:
//!
//! ```text
//! <defaults>
//! /usr/share/quay/os-config.toml   # shipped with the OS image
//! /var/lib/quay/conf/quay.toml     # local, written by `ConfigLoader::set`
//! ```
//!
//! The boot pipeline reads [`BootConfig`], the power commands read the
//! `[power]` table as [`PowerConfig`].
//!
//! ```rust,no_run
//! use quay_config::ConfigLoader;
//!
//! let loader = ConfigLoader::system();
//! let config = loader.load().unwrap();
//! println!("state device: {}", config.state.dev);
//!
//! loader.set("state.dev", "LABEL=B2D_STATE").unwrap();
//! ```

pub mod boot;
pub mod error;
pub mod loader;
pub mod paths;
pub mod power;

pub use boot::{BootConfig, CloudInitConfig, HookConfig, RuntimeLaunchConfig, StateConfig};
pub use error::{Error, Result};
pub use loader::ConfigLoader;
pub use power::PowerConfig;
