//! K-means clustering of reflectance samples
//!
//! Used to separate genuinely dark cloud-shadow pixels from the rest of a
//! candidate region. Seeding is deterministic so repeated runs over the same
//! samples give identical centroids.

use crate::types::{RefineError, RefineResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Parameters for k-means clustering
#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Number of clusters
    pub cluster_count: usize,
    /// Upper bound on Lloyd iterations
    pub max_iterations: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            cluster_count: 3,
            max_iterations: 100,
        }
    }
}

/// Outcome of one clustering run
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// K x D centroids in cluster-index order
    pub centroids: Array2<f64>,
    /// Cluster index of each sample
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

impl ClusterResult {
    pub fn cluster_count(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn centroid(&self, k: usize) -> ArrayView1<'_, f64> {
        self.centroids.row(k)
    }

    /// Index of the cluster with the lowest primary-band centroid
    pub fn darkest_cluster(&self) -> usize {
        let mut darkest = 0;
        for k in 1..self.centroids.nrows() {
            if self.centroids[[k, 0]] < self.centroids[[darkest, 0]] {
                darkest = k;
            }
        }
        darkest
    }

    /// Centroids ordered by ascending primary band, darkest first
    pub fn sorted_by_brightness(&self) -> Array2<f64> {
        let mut order: Vec<usize> = (0..self.centroids.nrows()).collect();
        order.sort_by(|&a, &b| self.centroids[[a, 0]].total_cmp(&self.centroids[[b, 0]]));
        self.centroids.select(Axis(0), &order)
    }

    /// Nearest centroid for an arbitrary sample
    pub fn nearest(&self, sample: ArrayView1<'_, f64>) -> usize {
        nearest_centroid(&self.centroids, sample)
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Ties resolve to the lower cluster index
fn nearest_centroid(centroids: &Array2<f64>, sample: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (k, centroid) in centroids.outer_iter().enumerate() {
        let distance = squared_distance(sample, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = k;
        }
    }
    best
}

/// Assign every sample to its nearest centroid, reporting whether anything changed
fn assign(centroids: &Array2<f64>, features: ArrayView2<'_, f64>, assignments: &mut [usize]) -> bool {
    let mut changed = false;
    for (i, sample) in features.outer_iter().enumerate() {
        let best = nearest_centroid(centroids, sample);
        if assignments[i] != best {
            assignments[i] = best;
            changed = true;
        }
    }
    changed
}

/// K-means clusterer over one or two reflectance bands
pub struct SpectralClusterer {
    params: ClusterParams,
}

impl SpectralClusterer {
    pub fn new() -> Self {
        Self {
            params: ClusterParams::default(),
        }
    }

    pub fn with_params(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    /// Cluster a single band
    pub fn cluster_single(&self, band: &[f64]) -> RefineResult<ClusterResult> {
        let features = ArrayView2::from_shape((band.len(), 1), band)
            .map_err(|e| RefineError::Clustering(format!("Failed to shape samples: {}", e)))?;
        self.cluster(features)
    }

    /// Cluster two parallel bands as 2-D samples
    pub fn cluster_dual(&self, band_a: &[f64], band_b: &[f64]) -> RefineResult<ClusterResult> {
        if band_a.len() != band_b.len() {
            return Err(RefineError::Clustering(format!(
                "Band lengths differ: {} vs {}",
                band_a.len(),
                band_b.len()
            )));
        }
        let mut features = Array2::<f64>::zeros((band_a.len(), 2));
        for (i, (a, b)) in band_a.iter().zip(band_b.iter()).enumerate() {
            features[[i, 0]] = *a;
            features[[i, 1]] = *b;
        }
        self.cluster(features.view())
    }

    /// Seed centroids from the per-dimension bounding box of the samples
    ///
    /// Cluster 0 starts at the minimum, cluster 1 at the maximum, and cluster
    /// j >= 2 at `min + (max - min) * (j - 1) / K`.
    pub fn initial_centroids(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let k = self.params.cluster_count;
        let dims = features.ncols();
        let mut lower = Array1::from_elem(dims, f64::INFINITY);
        let mut upper = Array1::from_elem(dims, f64::NEG_INFINITY);
        for sample in features.outer_iter() {
            for d in 0..dims {
                lower[d] = lower[d].min(sample[d]);
                upper[d] = upper[d].max(sample[d]);
            }
        }

        let mut centroids = Array2::<f64>::zeros((k, dims));
        for j in 0..k {
            for d in 0..dims {
                centroids[[j, d]] = match j {
                    0 => lower[d],
                    1 => upper[d],
                    _ => lower[d] + (upper[d] - lower[d]) * (j - 1) as f64 / k as f64,
                };
            }
        }
        centroids
    }

    /// Run Lloyd iterations over an N x D sample matrix
    pub fn cluster(&self, features: ArrayView2<'_, f64>) -> RefineResult<ClusterResult> {
        let k = self.params.cluster_count;
        let (samples, dims) = features.dim();
        if k == 0 {
            return Err(RefineError::Clustering("cluster count must be at least 1".to_string()));
        }
        if samples == 0 || dims == 0 {
            return Err(RefineError::Clustering("no samples to cluster".to_string()));
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(RefineError::Clustering("samples must be finite".to_string()));
        }

        let mut centroids = self.initial_centroids(features);
        let mut assignments = vec![usize::MAX; samples];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.params.max_iterations {
            iterations += 1;

            if !assign(&centroids, features, &mut assignments) {
                converged = true;
                break;
            }

            let mut sums = Array2::<f64>::zeros((k, dims));
            let mut counts = vec![0usize; k];
            for (i, sample) in features.outer_iter().enumerate() {
                let cluster = assignments[i];
                for d in 0..dims {
                    sums[[cluster, d]] += sample[d];
                }
                counts[cluster] += 1;
            }
            for cluster in 0..k {
                // empty clusters keep their previous centroid
                if counts[cluster] > 0 {
                    for d in 0..dims {
                        centroids[[cluster, d]] = sums[[cluster, d]] / counts[cluster] as f64;
                    }
                }
            }
        }

        if !converged {
            // stopped on the cap: match the assignment to the final centroids
            assign(&centroids, features, &mut assignments);
            log::debug!("K-means: iteration cap of {} reached", self.params.max_iterations);
        }

        log::debug!(
            "K-means: {} samples, {} clusters, {} iterations",
            samples,
            k,
            iterations
        );

        Ok(ClusterResult {
            centroids,
            assignments,
            iterations,
        })
    }
}

impl Default for SpectralClusterer {
    fn default() -> Self {
        Self::new()
    }
}
