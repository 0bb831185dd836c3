//! Service configuration management for SvcMgr
//!
//! Renders JSON configs from templates, checks them for the required keys
//! and deploys them to hosts with a backup of the previous file.

pub mod config;
pub mod deploy;
pub mod template;

pub use config::{generate_config, load_config, missing_keys, validate_config, REQUIRED_KEYS};
pub use deploy::{deploy_config, fetch_config, DeployReport, MAX_DIFF_LINES};
pub use template::{render_template, Params};
