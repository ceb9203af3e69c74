//! Dimensionality-reduction microservice: projects high-dimensional embeddings into
//! 2D/3D coordinates for "cosmos" visualization. Implements a hybrid UMAP system — an
//! expensive learning phase that fits a nonlinear manifold and distills a cheap linear
//! Ridge surrogate, plus a cheap transform phase that embeds new points into a
//! previously learned manifold.

pub mod error;
pub mod handlers;
pub mod health;
pub mod matrix;
pub mod numerics;
pub mod ridge;
pub mod router;
pub mod umap_engine;

pub use error::AppError;
pub use router::build_router;
