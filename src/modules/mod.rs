pub mod activation;
pub mod blocks;
pub mod component;
pub mod dynamics;
pub mod estimators;
pub mod policies;
pub mod projection;

pub use activation::Activation;
pub use blocks::{Mlp, MlpConfig};
pub use component::{output_key, Component, DataDims, FnComponent, Interface};
pub use dynamics::{BlockSsm, BlockSsmConfig};
pub use estimators::{FullyObservable, TimeDelayEstimator, TimeDelayEstimatorConfig};
pub use policies::{MlpPolicy, MlpPolicyConfig};
pub use projection::IntegerProjection;
