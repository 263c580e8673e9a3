//! # provisio_config
//!
//! Loading and validation of the property files that drive a deployment.
//!
//! Two YAML documents describe every deployment:
//! - `env_props.<env>.yaml` - whitelists, storage sizing, node groups and
//!   task sizing for one environment
//! - `comm_props.yaml` - product prefix, network defaults and CI principal
//!   shared by all environments
//!
//! Loading is all-or-nothing: a document either parses, matches the schema
//! and passes validation, or the load fails with a [`ConfigError`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use provisio_config::PropertiesLoader;
//!
//! let loader = PropertiesLoader::new("./conf");
//! let props = loader.load_pair("staging").unwrap();
//! println!("{}", props.common.product_prefix);
//! ```

pub mod cidr;
pub mod error;
pub mod loader;
pub mod models;
pub mod validator;

pub use cidr::Ipv4Cidr;
pub use error::{ConfigError, ConfigResult};
pub use loader::{
    env_props_file, DeploymentProperties, PropertiesLoader, COMMON_PROPS_FILE, DEFAULT_CONF_DIR,
};
pub use models::*;
pub use validator::{is_valid_name_segment, PropertiesValidator, ValidationResult};
