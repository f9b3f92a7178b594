//! Nearest-neighbour index over the reduced catalog vectors.
//!
//! Positions are insertion order and line up 1:1 with the identifier table.
//! The flat index is exact; the HNSW index (feature `hnsw`) is approximate, so
//! callers must not assume perfect recall.

use serde::{Deserialize, Serialize};

use crate::codec::{decode_artifact, encode_artifact};
use crate::distance::l2_distance;
use crate::projection::ReducedVector;
use crate::{ArtifactKind, Result, RetrievalError, Stage};

#[cfg(feature = "hnsw")]
use hnsw::{Hnsw, Params, Searcher};
#[cfg(feature = "hnsw")]
use rand_pcg::Pcg64;
#[cfg(feature = "hnsw")]
use space::Metric;

/// Fixed-point scaling factor for HNSW distances.
/// `space::Metric` requires an unsigned unit, so f32 distances are scaled to u32.
#[cfg(feature = "hnsw")]
const HNSW_DISTANCE_SCALE: f32 = 100_000.0;

/// Minimum HNSW query-time search width.
#[cfg(feature = "hnsw")]
pub const HNSW_EF_SEARCH: usize = 50;

/// One search result: catalog position and its Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Exact index: every vector is compared against the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: u32,
    /// Row-major `len x dimension`.
    vectors: Vec<f32>,
}

impl FlatIndex {
    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension as usize
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                "index dimension must be > 0",
            ));
        }
        if self.vectors.len() % self.dimension as usize != 0 {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                format!(
                    "vector buffer of {} values is not a multiple of dimension {}",
                    self.vectors.len(),
                    self.dimension
                ),
            ));
        }
        if self.vectors.iter().any(|v| !v.is_finite()) {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                "index contains non-finite values",
            ));
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dimension as usize)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: l2_distance(query, row),
            })
            .collect();

        // Stable: equal distances keep insertion order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        hits
    }
}

#[cfg(feature = "hnsw")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Euclidean;

#[cfg(feature = "hnsw")]
impl Metric<Vec<f32>> for Euclidean {
    type Unit = u32;
    fn distance(&self, a: &Vec<f32>, b: &Vec<f32>) -> u32 {
        let d = l2_distance(a, b);
        (d * HNSW_DISTANCE_SCALE).min(u32::MAX as f32) as u32
    }
}

/// Approximate index backed by a hierarchical navigable small-world graph.
#[cfg(feature = "hnsw")]
#[derive(Clone, Serialize, Deserialize)]
#[allow(clippy::unsafe_derive_deserialize)]
pub struct HnswIndex {
    graph: Hnsw<Euclidean, Vec<f32>, Pcg64, 16, 32>,
    dimension: u32,
    count: usize,
}

#[cfg(feature = "hnsw")]
impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("vector_count", &self.count)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "hnsw")]
impl HnswIndex {
    fn build(dimension: u32, rows: Vec<Vec<f32>>) -> Self {
        let params = Params::new().ef_construction(100);
        let mut graph = Hnsw::new_params(Euclidean, params);
        let mut searcher = Searcher::default();
        let count = rows.len();
        for row in rows {
            graph.insert(row, &mut searcher);
        }
        Self {
            graph,
            dimension,
            count,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                "index dimension must be > 0",
            ));
        }
        if self.graph.len() != self.count {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                format!(
                    "graph holds {} vectors but header declares {}",
                    self.graph.len(),
                    self.count
                ),
            ));
        }
        let dimension = self.dimension as usize;
        for position in 0..self.graph.len() {
            let row = self.graph.feature(position);
            if row.len() != dimension {
                return Err(RetrievalError::config(
                    ArtifactKind::Index,
                    format!(
                        "vector {position} has {} values, expected {dimension}",
                        row.len()
                    ),
                ));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(RetrievalError::config(
                    ArtifactKind::Index,
                    format!("vector {position} contains non-finite values"),
                ));
            }
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let ef_search = HNSW_EF_SEARCH.max(k);
        let mut searcher = Searcher::default();
        let mut dest = vec![
            space::Neighbor {
                index: !0,
                distance: 0,
            };
            ef_search
        ];

        let query = query.to_vec();
        let found = self.graph.nearest(&query, ef_search, &mut searcher, &mut dest);

        found
            .iter()
            .take(k)
            .map(|neighbor| Neighbor {
                position: neighbor.index,
                distance: neighbor.distance as f32 / HNSW_DISTANCE_SCALE,
            })
            .collect()
    }
}

/// Read-only nearest-neighbour structure loaded from a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VectorIndex {
    Flat(FlatIndex),
    #[cfg(feature = "hnsw")]
    Hnsw(HnswIndex),
}

impl VectorIndex {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let index: Self = decode_artifact(bytes, ArtifactKind::Index)?;
        index.validate()?;
        tracing::debug!(
            kind = index.kind(),
            vector_count = index.len(),
            dimension = index.dimension(),
            "decoded nearest-neighbour index"
        );
        Ok(index)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_artifact(self, ArtifactKind::Index)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Flat(flat) => flat.validate(),
            #[cfg(feature = "hnsw")]
            Self::Hnsw(hnsw) => hnsw.validate(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flat(_) => "flat",
            #[cfg(feature = "hnsw")]
            Self::Hnsw(_) => "hnsw",
        }
    }

    /// Number of catalog vectors (`N`).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.len(),
            #[cfg(feature = "hnsw")]
            Self::Hnsw(hnsw) => hnsw.count,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of the stored vectors (`D_reduced`).
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.dimension as usize,
            #[cfg(feature = "hnsw")]
            Self::Hnsw(hnsw) => hnsw.dimension as usize,
        }
    }

    /// The `k` nearest catalog positions, ordered by ascending distance.
    ///
    /// `k` larger than the catalog is clamped; an empty catalog yields no hits.
    pub fn search(&self, query: &ReducedVector, k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument {
                reason: "k must be a positive integer".into(),
            });
        }
        if query.len() != self.dimension() {
            return Err(RetrievalError::InternalConsistency {
                stage: Stage::Search,
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let k = k.min(self.len());
        let hits = match self {
            Self::Flat(flat) => flat.search(query.as_slice(), k),
            #[cfg(feature = "hnsw")]
            Self::Hnsw(hnsw) => hnsw.search(query.as_slice(), k),
        };

        tracing::debug!(k, hits = hits.len(), kind = self.kind(), "searched index");
        Ok(hits)
    }
}

/// Collects catalog vectors in position order and produces an index.
#[derive(Debug, Clone)]
pub struct VectorIndexBuilder {
    dimension: usize,
    rows: Vec<Vec<f32>>,
}

impl VectorIndexBuilder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: Vec::new(),
        }
    }

    /// Append the vector for the next catalog position.
    pub fn add<I>(&mut self, vector: I) -> Result<usize>
    where
        I: Into<Vec<f32>>,
    {
        let vector = vector.into();
        if vector.len() != self.dimension {
            return Err(RetrievalError::config(
                ArtifactKind::Index,
                format!(
                    "vector {} has {} values, expected {}",
                    self.rows.len(),
                    vector.len(),
                    self.dimension
                ),
            ));
        }
        self.rows.push(vector);
        Ok(self.rows.len() - 1)
    }

    fn dimension_u32(&self) -> Result<u32> {
        u32::try_from(self.dimension).map_err(|_| {
            RetrievalError::config(ArtifactKind::Index, "index dimension is too large")
        })
    }

    pub fn finish_flat(self) -> Result<VectorIndex> {
        let flat = FlatIndex {
            dimension: self.dimension_u32()?,
            vectors: self.rows.into_iter().flatten().collect(),
        };
        flat.validate()?;
        Ok(VectorIndex::Flat(flat))
    }

    #[cfg(feature = "hnsw")]
    pub fn finish_hnsw(self) -> Result<VectorIndex> {
        let dimension = self.dimension_u32()?;
        let index = HnswIndex::build(dimension, self.rows);
        index.validate()?;
        Ok(VectorIndex::Hnsw(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn flat(rows: &[&[f32]], dimension: usize) -> VectorIndex {
        let mut builder = VectorIndexBuilder::new(dimension);
        for row in rows {
            builder.add(row.to_vec()).expect("add");
        }
        builder.finish_flat().expect("finish")
    }

    fn positions(hits: &[Neighbor]) -> Vec<usize> {
        hits.iter().map(|h| h.position).collect()
    }

    #[test]
    fn nearest_first() {
        let index = flat(&[&[0.0, 0.0], &[1.0, 0.0], &[5.0, 5.0]], 2);
        let hits = index.search(&ReducedVector::new(vec![0.1, 0.0]), 2).expect("search");
        assert_eq!(positions(&hits), vec![0, 1]);
        assert!((hits[0].distance - 0.1).abs() < 1e-6);
        assert!((hits[1].distance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn distances_are_non_decreasing() {
        let rows: Vec<Vec<f32>> = (0..200)
            .map(|i| vec![((i * 37) % 101) as f32 / 10.0, ((i * 11) % 53) as f32 / 7.0])
            .collect();
        let refs: Vec<&[f32]> = rows.iter().map(Vec::as_slice).collect();
        let index = flat(&refs, 2);
        let hits = index.search(&ReducedVector::new(vec![3.0, 2.0]), 50).expect("search");
        assert_eq!(hits.len(), 50);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn k_is_clamped_to_catalog_size() {
        let index = flat(&[&[0.0], &[1.0], &[2.0]], 1);
        let hits = index.search(&ReducedVector::new(vec![0.0]), 10).expect("search");
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = flat(&[&[1.0, 0.0], &[0.0, 1.0], &[-1.0, 0.0], &[0.0, -1.0]], 2);
        let hits = index.search(&ReducedVector::new(vec![0.0, 0.0]), 4).expect("search");
        assert_eq!(positions(&hits), vec![0, 1, 2, 3]);
    }

    #[test]
    fn zero_k_is_invalid_argument() {
        let index = flat(&[&[0.0]], 1);
        let err = index.search(&ReducedVector::new(vec![0.0]), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn empty_catalog_returns_nothing() {
        let index = VectorIndexBuilder::new(2).finish_flat().expect("finish");
        assert!(index.is_empty());
        let hits = index.search(&ReducedVector::new(vec![0.0, 0.0]), 5).expect("search");
        assert!(hits.is_empty());

        // k = 0 is rejected even on an empty catalog
        assert!(index.search(&ReducedVector::new(vec![0.0, 0.0]), 0).is_err());
    }

    #[test]
    fn query_dimension_mismatch_is_internal_consistency() {
        let index = flat(&[&[0.0, 0.0]], 2);
        let err = index.search(&ReducedVector::new(vec![0.0]), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
        assert_eq!(err.stage(), Some(Stage::Search));
    }

    #[test]
    fn builder_rejects_wrong_length() {
        let mut builder = VectorIndexBuilder::new(3);
        assert!(builder.add(vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn decode_rejects_ragged_buffer() {
        let bytes = encode_artifact(
            &VectorIndex::Flat(FlatIndex {
                dimension: 3,
                vectors: vec![0.0; 7],
            }),
            ArtifactKind::Index,
        )
        .expect("encode");
        let err = VectorIndex::decode(&bytes).unwrap_err();
        assert_eq!(err.artifact(), Some(ArtifactKind::Index));
    }

    #[test]
    fn decoded_index_searches_identically() {
        let index = flat(&[&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0], &[9.0, 9.0, 9.0]], 3);
        let decoded = VectorIndex::decode(&index.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.dimension(), 3);
        let query = ReducedVector::new(vec![1.0, 2.0, 2.5]);
        assert_eq!(
            index.search(&query, 3).expect("original"),
            decoded.search(&query, 3).expect("decoded")
        );
    }

    #[test]
    #[cfg(feature = "hnsw")]
    fn hnsw_finds_exact_match() {
        let dim = 16;
        let mut builder = VectorIndexBuilder::new(dim);
        for i in 0..500 {
            builder
                .add((0..dim).map(|_| i as f32).collect::<Vec<f32>>())
                .expect("add");
        }
        let index = builder.finish_hnsw().expect("hnsw");
        let decoded = VectorIndex::decode(&index.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.kind(), "hnsw");

        let query = ReducedVector::new(vec![250.0; dim]);
        let hits = decoded.search(&query, 5).expect("search");
        assert_eq!(hits[0].position, 250);
        assert!(hits[0].distance < 1e-3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    #[cfg(feature = "hnsw")]
    fn decode_rejects_malformed_hnsw_rows() {
        // single-row graphs, so insertion never compares mismatched vectors
        for row in [vec![1.0, 0.0, 7.0], vec![f32::NAN, 1.0]] {
            let bytes = encode_artifact(
                &VectorIndex::Hnsw(HnswIndex::build(2, vec![row])),
                ArtifactKind::Index,
            )
            .expect("encode");
            let err = VectorIndex::decode(&bytes).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
            assert_eq!(err.artifact(), Some(ArtifactKind::Index));
        }
    }

    #[test]
    #[cfg(feature = "hnsw")]
    fn hnsw_recall_against_flat() {
        let dim = 32;
        let rows: Vec<Vec<f32>> = (0..1500)
            .map(|i| (0..dim).map(|j| ((i * 7 + j * 13) % 1000) as f32 / 1000.0).collect())
            .collect();

        let mut exact = VectorIndexBuilder::new(dim);
        let mut approx = VectorIndexBuilder::new(dim);
        for row in &rows {
            exact.add(row.clone()).expect("add");
            approx.add(row.clone()).expect("add");
        }
        let exact = exact.finish_flat().expect("flat");
        let approx = approx.finish_hnsw().expect("hnsw");

        let query = ReducedVector::new(rows[750].clone());
        let truth: std::collections::HashSet<usize> =
            positions(&exact.search(&query, 10).expect("flat search")).into_iter().collect();
        let found = approx.search(&query, 10).expect("hnsw search");
        let recall = found.iter().filter(|h| truth.contains(&h.position)).count();
        assert!(recall >= 8, "recall {recall}/10");
    }
}
