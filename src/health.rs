//! Process-wide library availability probe, cached after first computation.
//!
//! The UMAP/Ridge backends are statically linked, so instead of an import check the
//! probe exercises a minimal fit to catch silent breakage, caching the result in a
//! `OnceCell` since it only needs to run once per process.

use once_cell::sync::OnceCell;

use crate::ridge;
use crate::umap_engine::{self, UmapParams};

#[derive(Debug, Clone, Copy)]
pub struct LibraryAvailability {
    pub umap_available: bool,
    pub sklearn_available: bool,
    pub serialization_available: bool,
}

static PROBE: OnceCell<LibraryAvailability> = OnceCell::new();

pub fn availability() -> LibraryAvailability {
    *PROBE.get_or_init(probe)
}

fn probe() -> LibraryAvailability {
    let umap_available = probe_umap();
    let sklearn_available = probe_ridge();
    let serialization_available = probe_serialization();

    LibraryAvailability {
        umap_available,
        sklearn_available,
        serialization_available,
    }
}

fn probe_umap() -> bool {
    let x = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
    umap_engine::learn(&x, &UmapParams::default(), 2).is_ok()
}

fn probe_ridge() -> bool {
    use ndarray::array;
    let x = array![[1.0, 0.0], [0.0, 1.0]];
    let u = array![[1.0], [0.0]];
    let w = ridge::fit_ridge(&x, &u, ridge::DEFAULT_ALPHA);
    w.shape() == [2, 1]
}

fn probe_serialization() -> bool {
    let model = umap_engine::FittedUmapModel {
        n_neighbors: 2,
        min_dist: 0.8,
        spread: 3.0,
        random_state: 42,
        metric: "cosine".to_string(),
        training_inputs: vec![vec![0.0, 1.0]],
        training_embedding: vec![vec![0.0, 0.0]],
    };
    umap_engine::serialize_model(&model).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_all_backends_available() {
        let a = availability();
        assert!(a.umap_available);
        assert!(a.sklearn_available);
        assert!(a.serialization_available);
    }
}
