//! Spatially balanced sampling of cached photos.
//!
//! The viewport is divided into an N x N grid. Each cell keeps at most
//! `ceil(max_photos / N^2)` photos, chosen uniformly at random when the cell
//! is over-full. Survivors are interleaved cell by cell so that the final
//! truncation to `max_photos` drops photos evenly across the viewport.

use crate::bbox::BoundingBox;
use crate::photo::Photo;
use rand::Rng;

/// Default number of grid divisions per axis.
pub const DEFAULT_GRID_SIZE: usize = 10;

/// Result of sampling a set of photos.
#[derive(Clone, Debug)]
pub struct SampledPhotos {
    pub photos: Vec<Photo>,
    /// Fraction of grid cells represented in `photos`, in `[0, 1]`.
    pub distribution_score: f64,
}

/// Grid sampler for a fixed result cap.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    grid_size: usize,
    max_photos: usize,
}

impl Sampler {
    pub fn new(max_photos: usize) -> Self {
        Self::with_grid_size(DEFAULT_GRID_SIZE, max_photos)
    }

    /// A zero grid size is treated as 1.
    pub fn with_grid_size(grid_size: usize, max_photos: usize) -> Self {
        Self {
            grid_size: grid_size.max(1),
            max_photos,
        }
    }

    pub fn max_photos(&self) -> usize {
        self.max_photos
    }

    fn cell_count(&self) -> usize {
        self.grid_size * self.grid_size
    }

    /// Maximum number of photos kept from any one grid cell.
    pub fn per_cell_cap(&self) -> usize {
        self.max_photos.div_ceil(self.cell_count())
    }

    fn axis_index(&self, value: f64, min: f64, span: f64) -> usize {
        let raw = ((value - min) / span * self.grid_size as f64).floor();
        if raw.is_nan() || raw < 0.0 {
            0
        } else {
            (raw as usize).min(self.grid_size - 1)
        }
    }

    /// Grid cell `(row, col)` for a location, clamped to the grid.
    pub fn cell_of(&self, viewport: &BoundingBox, lat: f64, lon: f64) -> (usize, usize) {
        let row = self.axis_index(lat, viewport.min_lat(), viewport.lat_span());
        let col = self.axis_index(lon, viewport.min_lon(), viewport.lon_span());
        (row, col)
    }

    fn cell_index(&self, viewport: &BoundingBox, photo: &Photo) -> usize {
        let (row, col) = self.cell_of(viewport, photo.lat(), photo.lon());
        row * self.grid_size + col
    }

    /// Fraction of grid cells that contain at least one of `photos`.
    pub fn distribution_score(&self, viewport: &BoundingBox, photos: &[Photo]) -> f64 {
        let mut occupied = vec![false; self.cell_count()];
        for photo in photos {
            occupied[self.cell_index(viewport, photo)] = true;
        }
        let filled = occupied.iter().filter(|o| **o).count();
        filled as f64 / self.cell_count() as f64
    }

    /// Select a capped, spatially balanced subset of `photos`.
    ///
    /// When `fully_covered` is set the score computation is skipped and the
    /// score is reported as 1.0.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        photos: Vec<Photo>,
        viewport: &BoundingBox,
        fully_covered: bool,
        rng: &mut R,
    ) -> SampledPhotos {
        let cap = self.per_cell_cap();
        let mut cells: Vec<Vec<Photo>> = vec![Vec::new(); self.cell_count()];
        for photo in photos {
            let idx = self.cell_index(viewport, &photo);
            cells[idx].push(photo);
        }

        for cell in cells.iter_mut() {
            if cell.len() > cap {
                let mut keep = rand::seq::index::sample(rng, cell.len(), cap).into_vec();
                keep.sort_unstable();
                let mut kept = Vec::with_capacity(cap);
                let mut taken: Vec<Option<Photo>> = cell.drain(..).map(Some).collect();
                for i in keep {
                    if let Some(photo) = taken[i].take() {
                        kept.push(photo);
                    }
                }
                *cell = kept;
            }
        }

        let mut selected = Vec::with_capacity(self.max_photos.min(cap * self.cell_count()));
        let mut iters: Vec<_> = cells.into_iter().map(Vec::into_iter).collect();
        'fill: loop {
            let mut progressed = false;
            for iter in iters.iter_mut() {
                if selected.len() >= self.max_photos {
                    break 'fill;
                }
                if let Some(photo) = iter.next() {
                    selected.push(photo);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        let distribution_score = if fully_covered {
            1.0
        } else {
            self.distribution_score(viewport, &selected)
        };

        SampledPhotos {
            photos: selected,
            distribution_score,
        }
    }
}
