//! # provisio_core
//!
//! Composition engine for provisio.
//!
//! This crate turns typed deployment properties into a cloud assembly: one
//! template per stack, a manifest with the deployment order, and the list
//! of parameters published along the way.
//!
//! # Architecture
//!
//! - **Environment**: target name, account and region of a run
//! - **Context**: environment plus the loaded property files
//! - **Stacks**: resource declarations rendered into templates
//! - **Tokens**: deploy-time values crossing stack boundaries
//! - **Parameters**: write-once store for published identifiers
//! - **App**: ordered, fail-fast stack construction and synthesis
//!
//! # Example
//!
//! ```rust,ignore
//! use provisio_core::{App, DeployContext, DeployEnvironment};
//! use provisio_config::PropertiesLoader;
//!
//! let environment = DeployEnvironment::from_env()?;
//! let props = PropertiesLoader::new("./conf").load_pair(&environment.name)?;
//! let mut app = App::new(DeployContext::from_properties(environment, props));
//!
//! let bucket = app.stack("s3", |scope| {
//!     scope.add_resource("data", "AWS::S3::Bucket", serde_json::json!({}))
//! })?;
//! app.synth("cdk.out")?;
//! ```

pub mod app;
pub mod context;
pub mod environment;
pub mod error;
pub mod naming;
pub mod parameters;
pub mod stack;
pub mod token;

pub use app::{
    App, Assembly, AssemblyManifest, StackLogEntry, StackManifest, StackScope, SynthLog,
    SynthState, ASSEMBLY_MANIFEST_FILE, DEFAULT_ASSEMBLY_DIR,
};
pub use context::DeployContext;
pub use environment::{DeployEnvironment, ACCOUNT_VAR, DEPLOY_ENV_VAR, REGION_VAR};
pub use error::{CoreError, CoreResult};
pub use naming::{arn, id_gen, ResourceNamer};
pub use parameters::{
    InMemoryParameterStore, ParameterManifest, ParameterStore, PublishedParameter,
    PARAMETER_MANIFEST_FILE,
};
pub use stack::{DeletionPolicy, Resource, ResourceRef, Stack, TEMPLATE_FORMAT_VERSION};
pub use token::{logical_id, Token};
