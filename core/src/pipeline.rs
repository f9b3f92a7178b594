//! Query-time retrieval: preprocess, encode, reduce, search, resolve.

use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;

use crate::bundle::ArtifactBundle;
use crate::preprocess::{ImageSource, Preprocessor};
use crate::{Result, RetrievalError, Stage};

/// Number of results returned when the caller does not choose.
pub const DEFAULT_TOP_K: usize = 25;

/// One ranked result with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    /// 1-based rank.
    pub rank: usize,
    /// Index position of the catalog item.
    pub position: usize,
    pub identifier: String,
    /// Euclidean distance in the reduced space.
    pub distance: f32,
}

/// Shared, swappable reference to the active bundle.
///
/// Requests take a [`snapshot`](Self::snapshot) once and use it for every
/// stage, so a concurrent [`swap`](Self::swap) never mixes artifacts from two
/// bundles within one request.
#[derive(Debug)]
pub struct BundleHandle {
    current: RwLock<Arc<ArtifactBundle>>,
}

impl BundleHandle {
    pub fn new(bundle: ArtifactBundle) -> Self {
        Self {
            current: RwLock::new(Arc::new(bundle)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ArtifactBundle> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `bundle` for subsequent requests and return the previous one.
    pub fn swap(&self, bundle: ArtifactBundle) -> Arc<ArtifactBundle> {
        let next = Arc::new(bundle);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, next);
        tracing::info!(
            previous = %previous.version(),
            current = %guard.version(),
            "artifact bundle swapped"
        );
        previous
    }
}

/// Stateless orchestration over a [`BundleHandle`].
#[derive(Debug)]
pub struct RetrievalPipeline {
    bundle: Arc<BundleHandle>,
    preprocessor: Preprocessor,
}

impl RetrievalPipeline {
    pub fn new(bundle: ArtifactBundle) -> Self {
        Self::with_handle(Arc::new(BundleHandle::new(bundle)))
    }

    pub fn with_handle(bundle: Arc<BundleHandle>) -> Self {
        Self {
            bundle,
            preprocessor: Preprocessor::new(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> &Arc<BundleHandle> {
        &self.bundle
    }

    /// Current bundle snapshot.
    #[must_use]
    pub fn bundle(&self) -> Arc<ArtifactBundle> {
        self.bundle.snapshot()
    }

    pub fn swap_bundle(&self, bundle: ArtifactBundle) -> Arc<ArtifactBundle> {
        self.bundle.swap(bundle)
    }

    /// Identifiers of the `k` catalog items most similar to `image`, most similar first.
    pub fn retrieve(&self, image: &ImageSource, k: usize) -> Result<Vec<String>> {
        Ok(self
            .retrieve_hits(image, k)?
            .into_iter()
            .map(|hit| hit.identifier)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve), keeping positions and distances.
    pub fn retrieve_hits(&self, image: &ImageSource, k: usize) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument {
                reason: "k must be a positive integer".into(),
            });
        }

        let bundle = self.bundle.snapshot();
        let span = tracing::debug_span!("retrieve", k, version = %bundle.version());
        let _enter = span.enter();

        let tensor = self
            .preprocessor
            .preprocess(image)
            .map_err(|err| err.at(Stage::Preprocess))?;
        let embedding = bundle
            .encoder()
            .encode(&tensor)
            .map_err(|err| err.at(Stage::Encode))?;
        let reduced = bundle
            .projection()
            .reduce(&embedding)
            .map_err(|err| err.at(Stage::Reduce))?;
        let neighbors = bundle
            .index()
            .search(&reduced, k)
            .map_err(|err| err.at(Stage::Search))?;

        let identifiers = bundle.identifiers();
        let hits = neighbors
            .into_iter()
            .enumerate()
            .map(|(rank, neighbor)| {
                let identifier = identifiers.get(neighbor.position).ok_or_else(|| {
                    RetrievalError::InternalConsistency {
                        stage: Stage::Resolve,
                        expected: identifiers.len(),
                        actual: neighbor.position + 1,
                    }
                })?;
                Ok(RetrievalHit {
                    rank: rank + 1,
                    position: neighbor.position,
                    identifier: identifier.to_string(),
                    distance: neighbor.distance,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|err| err.at(Stage::Resolve))?;

        tracing::debug!(hits = hits.len(), "retrieval complete");
        Ok(hits)
    }

    /// Run independent requests in parallel; each keeps its own outcome.
    pub fn retrieve_batch(&self, images: &[ImageSource], k: usize) -> Vec<Result<Vec<String>>> {
        images
            .par_iter()
            .map(|image| self.retrieve(image, k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingFunction;
    use crate::identifiers::IdentifierTable;
    use crate::index::VectorIndexBuilder;
    use crate::preprocess::PreprocessedTensor;
    use crate::projection::Projection;
    use crate::ErrorKind;

    struct Axis;

    impl EmbeddingFunction for Axis {
        fn name(&self) -> &str {
            "axis"
        }

        fn output_dim(&self) -> usize {
            3
        }

        fn embed(&self, _tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn bundle(ids: &[&str]) -> ArtifactBundle {
        let projection = Projection::from_parts(
            vec![0.9, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            2,
            None,
        )
        .expect("projection");
        let mut builder = VectorIndexBuilder::new(2);
        for row in [[0.0, 0.0], [1.0, 0.0], [5.0, 5.0]] {
            builder.add(row.to_vec()).expect("add");
        }
        ArtifactBundle::from_parts(
            Arc::new(Axis),
            projection,
            builder.finish_flat().expect("index"),
            ids.iter().copied().collect::<IdentifierTable>(),
            None,
        )
        .expect("bundle")
    }

    fn png() -> ImageSource {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(8, 8)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("png");
        ImageSource::from_bytes(out.into_inner())
    }

    #[test]
    fn returns_nearest_identifiers() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        assert_eq!(pipeline.retrieve(&png(), 2).expect("retrieve"), vec!["a", "b"]);
    }

    #[test]
    fn hits_carry_rank_and_distance() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        let hits = pipeline.retrieve_hits(&png(), 3).expect("retrieve");
        assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(hits[2].identifier, "c");
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn zero_k_is_rejected_before_decoding() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        let err = pipeline
            .retrieve(&ImageSource::from_bytes(b"not an image".to_vec()), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn decode_failure_is_tagged_with_stage() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        let err = pipeline
            .retrieve(&ImageSource::from_bytes(b"not an image".to_vec()), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.stage(), Some(Stage::Preprocess));
    }

    #[test]
    fn swap_changes_subsequent_results() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        let before = pipeline.bundle();
        let previous = pipeline.swap_bundle(bundle(&["x", "y", "z"]));
        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(pipeline.retrieve(&png(), 1).expect("retrieve"), vec!["x"]);

        // the old snapshot stays usable
        assert_eq!(before.identifiers().get(0), Some("a"));
    }

    #[test]
    fn batch_keeps_failures_isolated() {
        let pipeline = RetrievalPipeline::new(bundle(&["a", "b", "c"]));
        let results = pipeline.retrieve_batch(
            &[png(), ImageSource::from_bytes(Vec::new()), png()],
            1,
        );
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().expect("first"), &vec!["a".to_string()]);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().expect("third"), &vec!["a".to_string()]);
    }
}
