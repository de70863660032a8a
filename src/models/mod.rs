//! Data models

mod annotations;
mod certificate;
mod kube;

pub use annotations::*;
pub use certificate::*;
pub use kube::*;
