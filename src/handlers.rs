//! HTTP handlers: request validation, method dispatch, parameter adaptation, and
//! response envelope shaping, kept as plain functions over request/response structs
//! so the transport glue in `router.rs` stays thin.

use std::time::Instant;

use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, ValidatedJson};
use crate::health::{self, LibraryAvailability};
use crate::matrix;
use crate::numerics;
use crate::umap_engine::{self, ModelMetadata, UmapParams};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_target_dimensions() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct ReduceRequest {
    pub vectors: Vec<Vec<f64>>,
    pub method: String,
    #[serde(default = "default_target_dimensions")]
    pub target_dimensions: usize,
    pub n_neighbors: Option<usize>,
    pub min_dist: Option<f64>,
    pub spread: Option<f64>,
    pub random_state: Option<u64>,
    pub fitted_umap_model: Option<Vec<u8>>,
}

#[derive(Debug, Serialize)]
pub struct UmapParametersOut {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub random_state: u64,
    pub metric: String,
}

#[derive(Debug, Serialize)]
pub struct ReduceResponse {
    pub coordinates: Vec<Vec<f64>>,
    pub method: String,
    pub processing_time_ms: u64,
    pub input_dimensions: usize,
    pub output_dimensions: usize,
    pub n_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_matrix: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub umap_parameters: Option<UmapParametersOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fitted_umap_model: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_metadata: Option<ModelMetadata>,
    pub is_incremental: bool,
}

/// Returns `LibraryUnavailable`/`SerializationUnavailable` if the process-wide probe
/// found either backend broken. Checked by every UMAP-backed arm of `reduce` before
/// doing any work, per the "gate method handlers on it" design note.
fn require_umap_backend() -> Result<(), AppError> {
    let a = health::availability();
    if !a.umap_available {
        return Err(AppError::LibraryUnavailable("umap".to_string()));
    }
    if !a.serialization_available {
        return Err(AppError::SerializationUnavailable("bincode".to_string()));
    }
    Ok(())
}

/// `POST /reduce` — validates, adapts parameters, routes to the learning or transform
/// engine, and shapes the response envelope.
pub async fn reduce(
    ValidatedJson(req): ValidatedJson<ReduceRequest>,
) -> Result<JsonResponse<ReduceResponse>, AppError> {
    let start = Instant::now();

    let (n_samples, input_dimensions) = numerics::validate_matrix(&req.vectors)?;
    numerics::validate_target_dimensions(req.target_dimensions)?;

    match req.method.as_str() {
        "umap_learning" => {
            if n_samples < 2 {
                return Err(AppError::NotEnoughSamples { n: n_samples });
            }
            require_umap_backend()?;

            let requested_neighbors = req.n_neighbors.unwrap_or(15);
            let effective = umap_engine::effective_n_neighbors(requested_neighbors, n_samples);
            if requested_neighbors >= n_samples {
                warn!(
                    "n_neighbors {requested_neighbors} >= n_samples {n_samples}; clamped to {effective}"
                );
            }

            let min_dist = req.min_dist.unwrap_or(0.8);
            let spread = req.spread.unwrap_or(3.0);
            numerics::validate_min_dist(min_dist)?;
            numerics::validate_spread(spread)?;

            let params = UmapParams {
                n_neighbors: requested_neighbors,
                min_dist,
                spread,
                random_state: req.random_state.unwrap_or(42),
            };

            let out = umap_engine::learn(&req.vectors, &params, req.target_dimensions)?;
            let model_bytes = umap_engine::serialize_model(&out.model)?;
            let metadata = umap_engine::build_metadata(
                n_samples,
                input_dimensions,
                req.target_dimensions,
                model_bytes.len(),
            );

            let elapsed_ms = start.elapsed().as_millis() as u64;
            info!(
                "umap_learning complete: {n_samples} points, {input_dimensions}->{} dims in {elapsed_ms}ms",
                req.target_dimensions
            );

            Ok(JsonResponse(ReduceResponse {
                coordinates: out.coordinates,
                method: req.method,
                processing_time_ms: elapsed_ms,
                input_dimensions,
                output_dimensions: req.target_dimensions,
                n_samples,
                transformation_matrix: Some(out.transformation_matrix),
                umap_parameters: Some(UmapParametersOut {
                    n_neighbors: out.effective_n_neighbors,
                    min_dist: params.min_dist,
                    spread: params.spread,
                    random_state: params.random_state,
                    metric: "cosine".to_string(),
                }),
                fitted_umap_model: Some(model_bytes),
                model_metadata: Some(metadata),
                is_incremental: false,
            }))
        }
        "umap_transform" => {
            require_umap_backend()?;
            let model_bytes = req.fitted_umap_model.as_ref().ok_or_else(|| {
                AppError::ShapeInvalid("fitted_umap_model is required for umap_transform".to_string())
            })?;
            let model = umap_engine::deserialize_model(model_bytes)?;
            let coordinates = umap_engine::transform(&model, &req.vectors)?;
            let output_dimensions = coordinates.first().map(Vec::len).unwrap_or(0);

            let elapsed_ms = start.elapsed().as_millis() as u64;
            info!("umap_transform complete: {n_samples} points in {elapsed_ms}ms");

            Ok(JsonResponse(ReduceResponse {
                coordinates,
                method: req.method,
                processing_time_ms: elapsed_ms,
                input_dimensions,
                output_dimensions,
                n_samples,
                transformation_matrix: None,
                umap_parameters: None,
                fitted_umap_model: None,
                model_metadata: None,
                is_incremental: true,
            }))
        }
        "linear_transformation" => Err(AppError::DisabledMethod),
        other => Err(AppError::UnknownMethod(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct MatrixRequest {
    pub matrix_type: String,
    pub translation: Option<Vec<f64>>,
    pub rotation_axis: Option<Vec<f64>>,
    pub rotation_angle: Option<f64>,
    pub scale_factors: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct MatrixResponse {
    pub matrix: [[f64; 4]; 4],
    pub matrix_type: String,
    pub parameters: serde_json::Value,
}

/// `POST /create-matrix` — stateless construction of a named 4x4 homogeneous transform.
pub async fn create_matrix(
    ValidatedJson(req): ValidatedJson<MatrixRequest>,
) -> Result<JsonResponse<MatrixResponse>, AppError> {
    let (mat, parameters) = match req.matrix_type.as_str() {
        "identity" => (matrix::identity(), serde_json::json!({})),
        "translation" => {
            let t = matrix::parse_vec3(
                req.translation.as_deref().unwrap_or(&[0.0, 0.0, 0.0]),
                "translation",
            )?;
            (matrix::translation(t), serde_json::json!({ "translation": t }))
        }
        "rotation" => {
            let axis = matrix::parse_vec3(
                req.rotation_axis
                    .as_deref()
                    .ok_or_else(|| AppError::ShapeInvalid("rotation_axis is required".to_string()))?,
                "rotation_axis",
            )?;
            let angle = req
                .rotation_angle
                .ok_or_else(|| AppError::ShapeInvalid("rotation_angle is required".to_string()))?;
            let mat = matrix::rotation(axis, angle)?;
            (
                mat,
                serde_json::json!({ "rotation_axis": axis, "rotation_angle": angle }),
            )
        }
        "scale" => {
            let s = matrix::parse_vec3(
                req.scale_factors.as_deref().unwrap_or(&[1.0, 1.0, 1.0]),
                "scale_factors",
            )?;
            (matrix::scale(s), serde_json::json!({ "scale_factors": s }))
        }
        other => {
            return Err(AppError::UnknownMethod(format!(
                "unknown matrix_type '{other}'"
            )))
        }
    };

    Ok(JsonResponse(MatrixResponse {
        matrix: mat,
        matrix_type: req.matrix_type,
        parameters,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub umap_available: bool,
    pub sklearn_available: bool,
    pub version: String,
}

/// `GET /health`
pub async fn health_check() -> JsonResponse<HealthResponse> {
    let LibraryAvailability {
        umap_available,
        sklearn_available,
        ..
    } = health::availability();

    JsonResponse(HealthResponse {
        status: "healthy".to_string(),
        umap_available,
        sklearn_available,
        version: SERVICE_VERSION.to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub service: String,
    pub version: String,
    pub status: String,
    pub endpoints: Vec<String>,
}

/// `GET /`
pub async fn root() -> JsonResponse<RootResponse> {
    JsonResponse(RootResponse {
        service: "Cosmos Reduce".to_string(),
        version: SERVICE_VERSION.to_string(),
        status: "running".to_string(),
        endpoints: vec![
            "/health".to_string(),
            "/reduce".to_string(),
            "/create-matrix".to_string(),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[tokio::test]
    async fn s1_small_learning() {
        let req = ReduceRequest {
            vectors: corners(),
            method: "umap_learning".to_string(),
            target_dimensions: 3,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: Some(42),
            fitted_umap_model: None,
        };
        let resp = reduce(ValidatedJson(req)).await.expect("should succeed").0;
        assert_eq!(resp.coordinates.len(), 4);
        assert!(resp.coordinates.iter().all(|r| r.len() == 3));
        let tm = resp.transformation_matrix.expect("matrix present");
        assert_eq!(tm.len(), 4);
        assert!(tm.iter().all(|r| r.len() == 3));
        assert!(!resp.fitted_umap_model.expect("model present").is_empty());
        assert!(!resp.is_incremental);
    }

    #[tokio::test]
    async fn s2_transform_consistency() {
        let learn_req = ReduceRequest {
            vectors: corners(),
            method: "umap_learning".to_string(),
            target_dimensions: 3,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: Some(42),
            fitted_umap_model: None,
        };
        let learn_resp = reduce(ValidatedJson(learn_req)).await.unwrap().0;
        let bytes = learn_resp.fitted_umap_model.unwrap();

        let transform_req = ReduceRequest {
            vectors: corners(),
            method: "umap_transform".to_string(),
            target_dimensions: 3,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: None,
            fitted_umap_model: Some(bytes),
        };
        let transform_resp = reduce(ValidatedJson(transform_req)).await.unwrap().0;
        assert_eq!(transform_resp.coordinates.len(), 4);
        assert!(transform_resp.coordinates.iter().all(|r| r.len() == 3));
        assert!(transform_resp.is_incremental);
    }

    #[tokio::test]
    async fn s3_neighbor_clamp_succeeds() {
        let req = ReduceRequest {
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            method: "umap_learning".to_string(),
            target_dimensions: 2,
            n_neighbors: Some(50),
            min_dist: None,
            spread: None,
            random_state: Some(1),
            fitted_umap_model: None,
        };
        let resp = reduce(ValidatedJson(req)).await.expect("clamped request should succeed").0;
        assert_eq!(resp.coordinates.len(), 3);
        assert_eq!(
            resp.umap_parameters.unwrap().n_neighbors,
            umap_engine::effective_n_neighbors(50, 3)
        );
    }

    #[tokio::test]
    async fn s6_disabled_method() {
        let req = ReduceRequest {
            vectors: corners(),
            method: "linear_transformation".to_string(),
            target_dimensions: 3,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: None,
            fitted_umap_model: None,
        };
        let err = reduce(ValidatedJson(req)).await.unwrap_err();
        assert!(matches!(err, AppError::DisabledMethod));
    }

    #[tokio::test]
    async fn unknown_method_rejected() {
        let req = ReduceRequest {
            vectors: corners(),
            method: "tsne".to_string(),
            target_dimensions: 3,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: None,
            fitted_umap_model: None,
        };
        let err = reduce(ValidatedJson(req)).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownMethod(_)));
    }

    #[tokio::test]
    async fn not_enough_samples_for_learning() {
        let req = ReduceRequest {
            vectors: vec![vec![1.0, 2.0]],
            method: "umap_learning".to_string(),
            target_dimensions: 2,
            n_neighbors: None,
            min_dist: None,
            spread: None,
            random_state: None,
            fitted_umap_model: None,
        };
        let err = reduce(ValidatedJson(req)).await.unwrap_err();
        assert!(matches!(err, AppError::NotEnoughSamples { n: 1 }));
    }

    #[tokio::test]
    async fn s4_identity_matrix() {
        let req = MatrixRequest {
            matrix_type: "identity".to_string(),
            translation: None,
            rotation_axis: None,
            rotation_angle: None,
            scale_factors: None,
        };
        let resp = create_matrix(ValidatedJson(req)).await.unwrap().0;
        assert_eq!(resp.matrix, matrix::identity());
    }

    #[tokio::test]
    async fn s5_rotation_matrix() {
        let req = MatrixRequest {
            matrix_type: "rotation".to_string(),
            translation: None,
            rotation_axis: Some(vec![0.0, 0.0, 1.0]),
            rotation_angle: Some(std::f64::consts::FRAC_PI_2),
            scale_factors: None,
        };
        let resp = create_matrix(ValidatedJson(req)).await.unwrap().0;
        let out = matrix::apply(&resp.matrix, [1.0, 0.0, 0.0, 1.0]);
        assert!((out[0] - 0.0).abs() < 1e-9);
        assert!((out[1] - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn health_reports_all_available() {
        let resp = health_check().await.0;
        assert_eq!(resp.status, "healthy");
        assert!(resp.umap_available);
        assert!(resp.sklearn_available);
    }
}
