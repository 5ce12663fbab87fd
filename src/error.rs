//! Crate-level errors

use thiserror::Error;

use crate::backend::DriverError;
use crate::materials::MaterialKind;
use crate::render_graph::GraphError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostFxError {
    #[error("no package provided for material '{}'", .0.name())]
    MissingMaterialPackage(MaterialKind),

    #[error("driver does not support frame-buffer fetch subpasses")]
    SubpassUnsupported,

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("render graph error: {0}")]
    Graph(#[from] GraphError),
}

pub type PostFxResult<T> = Result<T, PostFxError>;
