pub mod error;
pub mod k8s;

pub use error::{Error, Result};
