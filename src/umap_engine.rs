//! UMAP learning and transform engines.
//!
//! Learning builds an approximate k-NN graph with `hnsw_rs` (cosine metric, matching
//! `PORTALSURFER-sempal/src/analysis/umap.rs`'s own `build_knn_graph`) and fits
//! `umap_rs::Umap` on it, seeded by `random_state` for reproducibility. Transform
//! deserializes a previously fitted model and embeds new points via a distance-weighted
//! average of their nearest training points' embeddings — an out-of-sample extension of
//! the single-nearest-neighbor placeholder seen in the retrieval pack's `clusterkit`
//! example, smoothed to a k-neighbor average for better fidelity.

use hnsw_rs::prelude::*;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::error::AppError;
use crate::ridge;

pub const BACKEND_VERSION: &str = "cosmos-reduce-native/0.2 (umap_rs+hnsw_rs)";

const HNSW_MAX_NB_CONNECTION: usize = 16;
const HNSW_MAX_LAYER: usize = 16;
const HNSW_EF_CONSTRUCTION: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub random_state: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            min_dist: 0.8,
            spread: 3.0,
            random_state: 42,
        }
    }
}

/// Clamps the requested `n_neighbors` to `[2, n_samples - 1]` when it is too large
/// for the sample size, per the small-N parameter adaptation rule.
pub fn effective_n_neighbors(requested: usize, n_samples: usize) -> usize {
    if requested >= n_samples {
        (n_samples.saturating_sub(1)).max(2)
    } else {
        requested.max(2)
    }
}

/// An opaque, serializable fitted model: training inputs plus the manifold they were
/// embedded to. Sufficient for the k-NN out-of-sample extension in `transform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedUmapModel {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub random_state: u64,
    pub metric: String,
    pub training_inputs: Vec<Vec<f32>>,
    pub training_embedding: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub training_samples: usize,
    pub input_dimensions: usize,
    pub output_dimensions: usize,
    pub serialized_size_bytes: usize,
    pub created_at: String,
    pub library_version: String,
}

pub struct LearnOutput {
    pub coordinates: Vec<Vec<f64>>,
    pub model: FittedUmapModel,
    pub transformation_matrix: Vec<Vec<f64>>,
    pub effective_n_neighbors: usize,
}

/// Fits a UMAP manifold on `x` (N x D) into `k` output dimensions, and distills a
/// Ridge linear surrogate from the same (X, U) pair.
pub fn learn(x: &[Vec<f64>], params: &UmapParams, k: usize) -> Result<LearnOutput, AppError> {
    let n = x.len();
    let dim = x[0].len();
    let n_neighbors = effective_n_neighbors(params.n_neighbors, n);

    let (knn_indices, knn_dists) = build_knn_graph(x, n_neighbors)?;
    let init = random_init(n, k, params.random_state);

    let flat: Vec<f32> = x.iter().flatten().map(|&v| v as f32).collect();
    let matrix = Array2::from_shape_vec((n, dim), flat)
        .map_err(|e| AppError::InternalError(format!("failed to build input matrix: {e}")))?;

    let mut config = umap_rs::UmapConfig::default();
    config.n_components = k;
    config.graph.n_neighbors = n_neighbors;
    config.manifold.min_dist = params.min_dist as f32;
    config.manifold.spread = params.spread as f32;

    let umap = umap_rs::Umap::new(config);
    let fitted = umap.fit(matrix.view(), knn_indices.view(), knn_dists.view(), init.view());
    let embedding = fitted.embedding();

    if embedding.ncols() != k {
        return Err(AppError::InternalError(format!(
            "umap returned {} columns, expected {k}",
            embedding.ncols()
        )));
    }

    let coordinates: Vec<Vec<f64>> = embedding
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|&v| v as f64).collect())
        .collect();

    let training_embedding: Vec<Vec<f32>> = embedding
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect();

    let x_arr = Array2::from_shape_vec(
        (n, dim),
        x.iter().flatten().copied().collect::<Vec<f64>>(),
    )
    .map_err(|e| AppError::InternalError(format!("failed to build ridge input matrix: {e}")))?;
    let u_arr = Array2::from_shape_vec(
        (n, k),
        coordinates.iter().flatten().copied().collect::<Vec<f64>>(),
    )
    .map_err(|e| AppError::InternalError(format!("failed to build ridge target matrix: {e}")))?;

    let w = ridge::fit_ridge(&x_arr, &u_arr, ridge::DEFAULT_ALPHA);
    let quality = ridge::surrogate_quality(&x_arr, &u_arr, &w);
    info!("ridge surrogate R^2-proxy (mse/var): {quality:.4}");

    let transformation_matrix: Vec<Vec<f64>> =
        w.rows().into_iter().map(|row| row.to_vec()).collect();

    let training_inputs: Vec<Vec<f32>> = x
        .iter()
        .map(|row| row.iter().map(|&v| v as f32).collect())
        .collect();

    let model = FittedUmapModel {
        n_neighbors,
        min_dist: params.min_dist,
        spread: params.spread,
        random_state: params.random_state,
        metric: "cosine".to_string(),
        training_inputs,
        training_embedding,
    };

    Ok(LearnOutput {
        coordinates,
        model,
        transformation_matrix,
        effective_n_neighbors: n_neighbors,
    })
}

/// Embeds new vectors into a previously fitted manifold via a distance-weighted
/// average of the `n_neighbors` nearest training points' embeddings.
pub fn transform(model: &FittedUmapModel, x_new: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, AppError> {
    if model.training_inputs.is_empty() {
        return Err(AppError::InternalError(
            "fitted model has no training data".to_string(),
        ));
    }
    let dim = model.training_inputs[0].len();
    for row in x_new {
        if row.len() != dim {
            return Err(AppError::InternalError(format!(
                "input dimension {} does not match model dimension {dim}",
                row.len()
            )));
        }
    }

    let n_train = model.training_inputs.len();
    let n_neighbors = model.n_neighbors.min(n_train).max(1);

    let max_elements = n_train.max(1024);
    let hnsw = Hnsw::new(
        HNSW_MAX_NB_CONNECTION,
        max_elements,
        HNSW_MAX_LAYER,
        HNSW_EF_CONSTRUCTION,
        DistCosine {},
    );
    for (idx, row) in model.training_inputs.iter().enumerate() {
        hnsw.insert((row.as_slice(), idx));
    }

    let mut out = Vec::with_capacity(x_new.len());
    for row in x_new {
        let query: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let neighbours = hnsw.search(&query, n_neighbors, (n_neighbors * 2).max(32));

        if neighbours.is_empty() {
            return Err(AppError::InternalError(
                "k-NN search returned no neighbors for transform".to_string(),
            ));
        }

        let k = model.training_embedding[0].len();
        let mut acc = vec![0.0f64; k];
        let mut weight_sum = 0.0f64;
        for neighbour in &neighbours {
            let weight = 1.0 / (neighbour.distance as f64 + 1e-6);
            let embedding = &model.training_embedding[neighbour.d_id];
            for j in 0..k {
                acc[j] += weight * embedding[j] as f64;
            }
            weight_sum += weight;
        }
        for v in acc.iter_mut() {
            *v /= weight_sum;
        }
        out.push(acc);
    }

    Ok(out)
}

pub fn serialize_model(model: &FittedUmapModel) -> Result<Vec<u8>, AppError> {
    bincode::serialize(model)
        .map_err(|e| AppError::InternalError(format!("model serialization failed: {e}")))
}

pub fn deserialize_model(bytes: &[u8]) -> Result<FittedUmapModel, AppError> {
    bincode::deserialize(bytes)
        .map_err(|e| AppError::InternalError(format!("model deserialization failed: {e}")))
}

pub fn build_metadata(
    training_samples: usize,
    input_dimensions: usize,
    output_dimensions: usize,
    serialized_size_bytes: usize,
) -> ModelMetadata {
    let created_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());

    ModelMetadata {
        training_samples,
        input_dimensions,
        output_dimensions,
        serialized_size_bytes,
        created_at,
        library_version: BACKEND_VERSION.to_string(),
    }
}

fn build_knn_graph(
    vectors: &[Vec<f64>],
    n_neighbors: usize,
) -> Result<(Array2<u32>, Array2<f32>), AppError> {
    let n = vectors.len();
    let dim = vectors[0].len();
    let data_f32: Vec<Vec<f32>> = vectors
        .iter()
        .map(|row| row.iter().map(|&v| v as f32).collect())
        .collect();

    let max_elements = n.max(1024);
    let hnsw = Hnsw::new(
        HNSW_MAX_NB_CONNECTION,
        max_elements,
        HNSW_MAX_LAYER,
        HNSW_EF_CONSTRUCTION,
        DistCosine {},
    );
    for (idx, row) in data_f32.iter().enumerate() {
        hnsw.insert((row.as_slice(), idx));
    }

    let mut knn_indices = Array2::<u32>::zeros((n, n_neighbors));
    let mut knn_dists = Array2::<f32>::zeros((n, n_neighbors));
    let ef_search = (n_neighbors * 2).max(32);

    for (row_idx, row) in data_f32.iter().enumerate() {
        let neighbours = hnsw.search(row.as_slice(), n_neighbors + 1, ef_search);
        let mut filled = 0usize;
        for neighbour in neighbours {
            if neighbour.d_id == row_idx {
                continue;
            }
            if filled >= n_neighbors {
                break;
            }
            knn_indices[(row_idx, filled)] = neighbour.d_id as u32;
            knn_dists[(row_idx, filled)] = neighbour.distance;
            filled += 1;
        }
        // Pad with self-references when fewer than n_neighbors distinct points exist
        // (only possible for very small N, already clamped by effective_n_neighbors).
        while filled < n_neighbors {
            knn_indices[(row_idx, filled)] = row_idx as u32;
            knn_dists[(row_idx, filled)] = 0.0;
            filled += 1;
        }
    }

    let _ = dim;
    Ok((knn_indices, knn_dists))
}

fn random_init(n_samples: usize, n_components: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((n_samples, n_components), |_| rng.random::<f32>() * 10.0)
}
