use crate::types::{Embedding, EnrollmentRecord};

/// Default maximum Euclidean distance for a positive match.
///
/// Lower values are stricter: fewer false accepts, more false rejects.
pub const DEFAULT_TOLERANCE: f64 = 0.5;

/// Outcome of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Known {
        identity: String,
        distance: f64,
        /// Position of the winning record in the gallery.
        index: usize,
    },
    Unknown {
        /// Closest distance seen, `None` for an empty gallery.
        best_distance: Option<f64>,
    },
}

impl Identification {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Identification::Known { identity, .. } => Some(identity),
            Identification::Unknown { .. } => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identification::Known { .. })
    }
}

/// Strategy for resolving a probe embedding to an enrolled identity.
pub trait Matcher {
    fn identify(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        tolerance: f64,
    ) -> Identification;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Scans the gallery left to right; on equal distances the lowest index
/// wins. A match requires `distance < tolerance` (strict).
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn identify(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        tolerance: f64,
    ) -> Identification {
        let mut best: Option<(usize, f64)> = None;

        for (i, record) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&record.embedding);
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        match best {
            Some((index, distance)) if distance < tolerance => Identification::Known {
                identity: gallery[index].identity.clone(),
                distance,
                index,
            },
            _ => Identification::Unknown {
                best_distance: best.map(|(_, d)| d),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;
    use approx::assert_relative_eq;
    use rstest::rstest;

    /// Embedding that is zero everywhere except `value` on `axis`.
    fn axis(axis: usize, value: f64) -> Embedding {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[axis] = value;
        Embedding::new(values).unwrap()
    }

    fn record(id: i64, identity: &str, embedding: Embedding) -> EnrollmentRecord {
        EnrollmentRecord {
            id,
            identity: identity.into(),
            embedding,
        }
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let result = EuclideanMatcher.identify(&axis(0, 1.0), &[], DEFAULT_TOLERANCE);
        assert_eq!(result, Identification::Unknown { best_distance: None });
    }

    #[test]
    fn test_empty_gallery_ignores_tolerance() {
        let result = EuclideanMatcher.identify(&axis(0, 0.0), &[], f64::INFINITY);
        assert!(!result.is_known());
    }

    #[test]
    fn test_best_match_is_not_first_entry() {
        let gallery = vec![
            record(1, "far", axis(0, 5.0)),
            record(2, "near", axis(0, 1.1)),
            record(3, "farther", axis(0, 9.0)),
        ];
        let result = EuclideanMatcher.identify(&axis(0, 1.0), &gallery, DEFAULT_TOLERANCE);
        assert_eq!(result.identity(), Some("near"));
        match result {
            Identification::Known { distance, index, .. } => {
                assert_eq!(index, 1);
                assert_relative_eq!(distance, 0.1, epsilon = 1e-9);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_tie_resolves_to_lowest_index() {
        let gallery = vec![
            record(1, "first", axis(1, 0.2)),
            record(2, "second", axis(1, 0.2)),
        ];
        let result = EuclideanMatcher.identify(&axis(1, 0.0), &gallery, DEFAULT_TOLERANCE);
        assert_eq!(result.identity(), Some("first"));
    }

    #[test]
    fn test_duplicate_identities_are_independent_candidates() {
        let gallery = vec![
            record(1, "alice", axis(0, 3.0)),
            record(2, "bob", axis(0, 1.0)),
            record(3, "alice", axis(0, 0.1)),
        ];
        let result = EuclideanMatcher.identify(&axis(0, 0.0), &gallery, DEFAULT_TOLERANCE);
        match result {
            Identification::Known { identity, index, .. } => {
                assert_eq!(identity, "alice");
                assert_eq!(index, 2);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[rstest]
    #[case::well_inside(0.3, 0.5, true)]
    #[case::just_inside(0.499_999, 0.5, true)]
    #[case::exactly_at_tolerance(0.5, 0.5, false)]
    #[case::outside(0.7, 0.5, false)]
    #[case::strict_tolerance(0.3, 0.2, false)]
    fn test_threshold_boundary(#[case] offset: f64, #[case] tolerance: f64, #[case] matched: bool) {
        let gallery = vec![record(1, "alice", axis(0, 0.0))];
        let result = EuclideanMatcher.identify(&axis(0, offset), &gallery, tolerance);
        assert_eq!(result.is_known(), matched, "offset={offset} tolerance={tolerance}");
    }

    #[test]
    fn test_unknown_reports_best_distance() {
        let gallery = vec![record(1, "alice", axis(0, 0.0))];
        let result = EuclideanMatcher.identify(&axis(0, 2.0), &gallery, DEFAULT_TOLERANCE);
        match result {
            Identification::Unknown { best_distance } => {
                assert_relative_eq!(best_distance.unwrap(), 2.0);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_is_deterministic() {
        let gallery = vec![
            record(1, "alice", axis(0, 0.0)),
            record(2, "bob", axis(1, 0.4)),
        ];
        let probe = axis(1, 0.1);
        let first = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        let second = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(first, second);
    }
}
