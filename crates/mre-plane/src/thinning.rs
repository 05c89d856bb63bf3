//! Query-time root-segment thinning.

use mre_models::{reduce_to_roots, ScanOrder, Segment};
use tracing::debug;

use crate::error::PlaneResult;
use crate::traits::{SegmentQuery, SegmentStore};

/// Fetch every segment matching `query`, nested ones included.
///
/// Pages are followed until the store stops returning a continuation token.
pub async fn fetch_segments<S: SegmentStore + ?Sized>(
    store: &S,
    mut query: SegmentQuery,
) -> PlaneResult<Vec<Segment>> {
    let mut segments = Vec::new();

    loop {
        let page = store.query(&query).await?;
        segments.extend(page.items);
        match page.next_token {
            Some(token) => query.page_token = Some(token),
            None => break,
        }
    }
    Ok(segments)
}

/// Fetch every segment of a classifier in `order` and drop nested ones.
///
/// Meant for callers that list only top-level segments, such as clip preview
/// listings. The replay engine keeps nested segments to place blobs on them.
pub async fn fetch_root_segments<S: SegmentStore + ?Sized>(
    store: &S,
    program: &str,
    event: &str,
    classifier: &str,
    order: ScanOrder,
) -> PlaneResult<Vec<Segment>> {
    let query = SegmentQuery::new(program, event, classifier).with_order(order);
    let segments = fetch_segments(store, query).await?;
    let total = segments.len();
    let roots = reduce_to_roots(segments, order);
    debug!(
        classifier = %classifier,
        total,
        roots = roots.len(),
        "Reduced segments to roots"
    );
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPlane;

    async fn seeded() -> InMemoryPlane {
        let plane = InMemoryPlane::new();
        for (start, end) in [(0.0, 10.0), (2.0, 5.0), (3.0, 12.0), (11.0, 11.5), (20.0, 25.0)] {
            plane
                .put(&Segment::new("p", "e", "c", start, end))
                .await
                .unwrap();
        }
        plane
    }

    fn bounds(segments: &[Segment]) -> Vec<(f64, f64)> {
        segments.iter().map(|s| (s.start, s.end)).collect()
    }

    #[tokio::test]
    async fn test_ascending_roots() {
        let plane = seeded().await;
        let roots = fetch_root_segments(&plane, "p", "e", "c", ScanOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(
            bounds(&roots),
            vec![(0.0, 10.0), (3.0, 12.0), (20.0, 25.0)]
        );
    }

    #[tokio::test]
    async fn test_descending_roots() {
        let plane = seeded().await;
        let roots = fetch_root_segments(&plane, "p", "e", "c", ScanOrder::Descending)
            .await
            .unwrap();
        assert_eq!(
            bounds(&roots),
            vec![(20.0, 25.0), (11.0, 11.5), (2.0, 5.0)]
        );
    }

    #[tokio::test]
    async fn test_follows_every_page() {
        let plane = InMemoryPlane::new();
        for i in 0..250 {
            let start = i as f64 * 10.0;
            plane
                .put(&Segment::new("p", "e", "c", start, start + 5.0))
                .await
                .unwrap();
        }
        let roots = fetch_root_segments(&plane, "p", "e", "c", ScanOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(roots.len(), 250);
        assert_eq!(roots[249].start, 2490.0);
    }

    #[tokio::test]
    async fn test_fetch_segments_keeps_nested() {
        let plane = seeded().await;
        let all = fetch_segments(&plane, SegmentQuery::new("p", "e", "c"))
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[1].start, 2.0);
    }

    #[tokio::test]
    async fn test_fetch_segments_honors_start_range() {
        let plane = InMemoryPlane::new();
        for i in 0..250 {
            let start = i as f64 * 10.0;
            plane
                .put(&Segment::new("p", "e", "c", start, start + 5.0))
                .await
                .unwrap();
        }
        let query = SegmentQuery::new("p", "e", "c")
            .with_start_range(Some(1000.0), Some(1999.0))
            .with_limit(30);
        let segments = fetch_segments(&plane, query).await.unwrap();
        assert_eq!(segments.len(), 100);
        assert_eq!(segments[0].start, 1000.0);
        assert_eq!(segments[99].start, 1990.0);
    }

    #[tokio::test]
    async fn test_unknown_classifier_is_empty() {
        let plane = seeded().await;
        let roots = fetch_root_segments(&plane, "p", "e", "nope", ScanOrder::Ascending)
            .await
            .unwrap();
        assert!(roots.is_empty());
    }
}
