//! # provisio_stacks
//!
//! The stacks of a provisio deployment and their composition.
//!
//! # Stacks
//!
//! | Stack             | Depends on                   | Compute target |
//! |-------------------|------------------------------|----------------|
//! | `foundation`      |                              | all            |
//! | `s3`              |                              | all            |
//! | `db`              | foundation                   | all            |
//! | `eks-service`     | foundation, db               | eks            |
//! | `load-balancer`   | foundation, s3               | fargate        |
//! | `fargate-service` | foundation, db, load-balancer | fargate       |
//!
//! # Example
//!
//! ```rust,ignore
//! use provisio_stacks::{compose, ComputeTarget};
//!
//! let mut app = App::new(context);
//! compose(&mut app, ComputeTarget::Eks)?;
//! app.synth("cdk.out")?;
//! ```

pub mod compose;
pub mod containers;
pub mod database;
pub mod eks_service;
pub mod fargate_service;
pub mod foundation;
pub mod load_balancer;
pub mod storage;

pub use compose::{compose, Composition, ComputeOutputs, ComputeTarget};
pub use containers::{ContainerRole, ImageSource, Repositories, DEFAULT_IMAGE_TAG};
pub use database::DatabaseOutputs;
pub use eks_service::{EksInputs, EksOutputs};
pub use fargate_service::{FargateInputs, FargateOutputs};
pub use foundation::FoundationOutputs;
pub use load_balancer::{LoadBalancerInputs, LoadBalancerOutputs};
pub use storage::StorageOutputs;
