//! Coverage tracking: which parts of a viewport still need upstream data.
//!
//! Only complete regions count as coverage. The uncovered remainder of a
//! viewport is decomposed on the grid formed by the clipped region edges;
//! uncovered grid cells are grouped into edge-connected components and the
//! bounding rectangle of each component is returned. Bounding rectangles
//! may overlap covered area (over-selection) but never miss uncovered area.

use crate::bbox::BoundingBox;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// The coverage-relevant view of a stored region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionCoverage {
    pub bbox: BoundingBox,
    pub is_complete: bool,
}

fn sorted_edges(mut edges: Vec<f64>) -> Vec<f64> {
    edges.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    edges.dedup();
    edges
}

/// Index of `value` among the sorted grid lines.
fn edge_index(edges: &[f64], value: f64) -> usize {
    edges.partition_point(|edge| *edge < value)
}

/// Complete regions clipped to the viewport, dropping zero-area contacts.
fn clipped_cover(viewport: &BoundingBox, regions: &[RegionCoverage]) -> Vec<BoundingBox> {
    regions
        .iter()
        .filter(|r| r.is_complete)
        .filter_map(|r| viewport.intersection(&r.bbox))
        .collect()
}

/// Whether the union of complete regions covers the whole viewport.
///
/// Callers that also need the sub-areas should call [`uncovered_sub_areas`]
/// once and check for an empty result instead.
pub fn is_fully_covered(viewport: &BoundingBox, regions: &[RegionCoverage]) -> bool {
    uncovered_sub_areas(viewport, regions).is_empty()
}

/// Compute the rectangular sub-areas of `viewport` not covered by any
/// complete region.
///
/// Returns `[viewport]` when no complete region overlaps it and `[]` when it
/// is fully covered. Results are ordered north to south, then west to east.
pub fn uncovered_sub_areas(viewport: &BoundingBox, regions: &[RegionCoverage]) -> Vec<BoundingBox> {
    let cover = clipped_cover(viewport, regions);
    if cover.is_empty() {
        return vec![*viewport];
    }
    if cover.iter().any(|c| c.contains(viewport)) {
        return Vec::new();
    }

    let mut lons = vec![viewport.min_lon(), viewport.max_lon()];
    let mut lats = vec![viewport.min_lat(), viewport.max_lat()];
    for c in &cover {
        lons.extend([c.min_lon(), c.max_lon()]);
        lats.extend([c.min_lat(), c.max_lat()]);
    }
    let lons = sorted_edges(lons);
    let lats = sorted_edges(lats);

    let cols = lons.len() - 1;
    let rows = lats.len() - 1;

    // Every region edge is itself a grid line, so each region covers an
    // exact block of cells found by binary search.
    let mut uncovered = vec![true; cols * rows];
    for c in &cover {
        let col_start = edge_index(&lons, c.min_lon());
        let col_end = edge_index(&lons, c.max_lon());
        for row in edge_index(&lats, c.min_lat())..edge_index(&lats, c.max_lat()) {
            uncovered[row * cols + col_start..row * cols + col_end].fill(false);
        }
    }

    let mut visited = vec![false; cols * rows];
    let mut areas = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..uncovered.len() {
        if !uncovered[start] || visited[start] {
            continue;
        }

        let (mut min_row, mut max_row) = (usize::MAX, 0);
        let (mut min_col, mut max_col) = (usize::MAX, 0);
        visited[start] = true;
        queue.push_back(start);

        while let Some(cell) = queue.pop_front() {
            let (row, col) = (cell / cols, cell % cols);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);

            let mut neighbours = Vec::with_capacity(4);
            if row > 0 {
                neighbours.push(cell - cols);
            }
            if row + 1 < rows {
                neighbours.push(cell + cols);
            }
            if col > 0 {
                neighbours.push(cell - 1);
            }
            if col + 1 < cols {
                neighbours.push(cell + 1);
            }

            for next in neighbours {
                if uncovered[next] && !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        match BoundingBox::new(
            lats[min_row],
            lons[min_col],
            lats[max_row + 1],
            lons[max_col + 1],
        ) {
            Ok(area) => areas.push(area),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping degenerate uncovered area");
            }
        }
    }

    areas.sort_by(|a, b| {
        b.max_lat()
            .partial_cmp(&a.max_lat())
            .unwrap_or(Ordering::Equal)
            .then(
                a.min_lon()
                    .partial_cmp(&b.min_lon())
                    .unwrap_or(Ordering::Equal),
            )
    });
    areas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> BoundingBox {
        BoundingBox::new(min_lat, min_lon, max_lat, max_lon).unwrap()
    }

    fn complete(b: BoundingBox) -> RegionCoverage {
        RegionCoverage {
            bbox: b,
            is_complete: true,
        }
    }

    fn incomplete(b: BoundingBox) -> RegionCoverage {
        RegionCoverage {
            bbox: b,
            is_complete: false,
        }
    }

    /// Sample points across the viewport and check each one is either inside
    /// a complete region or inside some returned sub-area.
    fn assert_no_under_selection(
        viewport: &BoundingBox,
        regions: &[RegionCoverage],
        areas: &[BoundingBox],
    ) {
        let steps = 40;
        for i in 0..=steps {
            for j in 0..=steps {
                let lat = viewport.min_lat() + viewport.lat_span() * (i as f64 / steps as f64);
                let lon = viewport.min_lon() + viewport.lon_span() * (j as f64 / steps as f64);
                let covered = regions
                    .iter()
                    .any(|r| r.is_complete && r.bbox.contains_point(lat, lon));
                let selected = areas.iter().any(|a| a.contains_point(lat, lon));
                assert!(
                    covered || selected,
                    "point ({lat}, {lon}) neither covered nor selected"
                );
            }
        }
    }

    #[test]
    fn test_no_regions_returns_viewport() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        assert_eq!(uncovered_sub_areas(&viewport, &[]), vec![viewport]);
    }

    #[test]
    fn test_incomplete_regions_do_not_cover() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [incomplete(bbox(-1.0, -1.0, 2.0, 2.0))];
        assert_eq!(uncovered_sub_areas(&viewport, &regions), vec![viewport]);
        assert!(!is_fully_covered(&viewport, &regions));
    }

    #[test]
    fn test_disjoint_region_returns_viewport() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [complete(bbox(5.0, 5.0, 6.0, 6.0))];
        assert_eq!(uncovered_sub_areas(&viewport, &regions), vec![viewport]);
    }

    #[test]
    fn test_edge_contact_region_returns_viewport() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [complete(bbox(1.0, 0.0, 2.0, 1.0))];
        assert_eq!(uncovered_sub_areas(&viewport, &regions), vec![viewport]);
    }

    #[test]
    fn test_containing_region_covers_everything() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [complete(bbox(-1.0, -1.0, 2.0, 2.0))];
        assert!(uncovered_sub_areas(&viewport, &regions).is_empty());
        assert!(is_fully_covered(&viewport, &regions));
    }

    #[test]
    fn test_exact_match_covers_everything() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [complete(viewport)];
        assert!(uncovered_sub_areas(&viewport, &regions).is_empty());
    }

    #[test]
    fn test_union_of_tiles_covers_everything() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [
            complete(bbox(0.0, 0.0, 0.5, 1.0)),
            complete(bbox(0.5, 0.0, 1.0, 0.5)),
            complete(bbox(0.5, 0.5, 1.0, 1.0)),
        ];
        assert!(uncovered_sub_areas(&viewport, &regions).is_empty());
    }

    #[test]
    fn test_half_covered_returns_other_half() {
        let viewport = bbox(0.0, 0.0, 1.0, 1.0);
        let regions = [complete(bbox(0.0, 0.0, 1.0, 0.5))];
        let areas = uncovered_sub_areas(&viewport, &regions);
        assert_eq!(areas, vec![bbox(0.0, 0.5, 1.0, 1.0)]);
    }

    #[test]
    fn test_hole_in_middle_over_selects_but_never_under_selects() {
        let viewport = bbox(0.0, 0.0, 3.0, 3.0);
        let regions = [complete(bbox(1.0, 1.0, 2.0, 2.0))];
        let areas = uncovered_sub_areas(&viewport, &regions);
        // The ring around the hole is one connected component.
        assert_eq!(areas, vec![viewport]);
        assert_no_under_selection(&viewport, &regions, &areas);
    }

    #[test]
    fn test_diagonal_cover_yields_two_components() {
        let viewport = bbox(0.0, 0.0, 2.0, 2.0);
        let regions = [
            complete(bbox(0.0, 0.0, 1.0, 1.0)),
            complete(bbox(1.0, 1.0, 2.0, 2.0)),
        ];
        let areas = uncovered_sub_areas(&viewport, &regions);
        assert_eq!(
            areas,
            vec![bbox(1.0, 0.0, 2.0, 1.0), bbox(0.0, 1.0, 1.0, 2.0)]
        );
        assert_no_under_selection(&viewport, &regions, &areas);
    }

    #[test]
    fn test_mixed_regions_outside_viewport_are_ignored() {
        let viewport = bbox(10.0, 10.0, 12.0, 12.0);
        let regions = [
            complete(bbox(9.0, 9.0, 11.0, 13.0)),
            incomplete(bbox(11.0, 9.0, 13.0, 13.0)),
            complete(bbox(40.0, 40.0, 41.0, 41.0)),
        ];
        let areas = uncovered_sub_areas(&viewport, &regions);
        assert_eq!(areas, vec![bbox(11.0, 10.0, 12.0, 12.0)]);
        assert_no_under_selection(&viewport, &regions, &areas);
    }

    fn tiles(n: usize) -> Vec<RegionCoverage> {
        (0..n * n)
            .map(|i| {
                let (row, col) = ((i / n) as f64, (i % n) as f64);
                complete(bbox(row, col, row + 1.0, col + 1.0))
            })
            .collect()
    }

    #[test]
    fn test_many_tiles_cover_viewport() {
        let viewport = bbox(0.0, 0.0, 20.0, 20.0);
        let regions = tiles(20);
        assert_eq!(regions.len(), 400);
        assert!(uncovered_sub_areas(&viewport, &regions).is_empty());
    }

    #[test]
    fn test_many_tiles_with_one_missing() {
        let viewport = bbox(0.0, 0.0, 20.0, 20.0);
        let mut regions = tiles(20);
        // Row 7, column 11.
        regions.remove(7 * 20 + 11);

        let areas = uncovered_sub_areas(&viewport, &regions);
        assert_eq!(areas, vec![bbox(7.0, 11.0, 8.0, 12.0)]);
        assert_no_under_selection(&viewport, &regions, &areas);
    }

    #[test]
    fn test_overlapping_regions_mark_shared_cells_once() {
        let viewport = bbox(0.0, 0.0, 4.0, 4.0);
        let regions = [
            complete(bbox(0.0, 0.0, 3.0, 3.0)),
            complete(bbox(1.0, 1.0, 4.0, 4.0)),
        ];
        let areas = uncovered_sub_areas(&viewport, &regions);
        assert_eq!(
            areas,
            vec![bbox(3.0, 0.0, 4.0, 1.0), bbox(0.0, 3.0, 1.0, 4.0)]
        );
        assert_no_under_selection(&viewport, &regions, &areas);
    }
}
