//! Structured grid with staggered node locations.
//!
//! Each axis carries `N` cells bounded by `N + 1` faces. Values are stored
//! either at cell centers or at cell faces; on a periodic axis the last face
//! is the image of the first, so both locations have `N` nodes there. On a
//! bounded axis the face location has `N + 1` nodes.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};

use crate::error::{Result, TkeError};

/// Staggered position of a value along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Center,
    Face,
}

impl Location {
    /// The other staggered position; one differencing step moves here.
    pub fn flip(self) -> Self {
        match self {
            Location::Center => Location::Face,
            Location::Face => Location::Center,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Center => write!(f, "Center"),
            Location::Face => write!(f, "Face"),
        }
    }
}

/// Location of a 3D field along (x, y, z).
pub type Loc3 = [Location; 3];

use Location::{Center, Face};

pub const CCC: Loc3 = [Center, Center, Center];
/// Native location of `u`.
pub const FCC: Loc3 = [Face, Center, Center];
/// Native location of `v`.
pub const CFC: Loc3 = [Center, Face, Center];
/// Native location of `w` and of vertical fluxes.
pub const CCF: Loc3 = [Center, Center, Face];
pub const FFC: Loc3 = [Face, Face, Center];
pub const FCF: Loc3 = [Face, Center, Face];
pub const CFF: Loc3 = [Center, Face, Face];

/// Axis of the 3D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim3 {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Dim3 {
    pub const ALL: [Dim3; 3] = [Dim3::X, Dim3::Y, Dim3::Z];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Periodic,
    Bounded,
}

/// Execution target the fields live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Cpu,
    Gpu,
}

/// Immutable description of a rectilinear 3D domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    architecture: Architecture,
    topology: [Topology; 3],
    faces: [Array1<f64>; 3],
    centers: [Array1<f64>; 3],
    /// Cell widths, one per center.
    center_spacing: [Array1<f64>; 3],
    /// Distance between the centers on either side of each face node.
    face_spacing: [Array1<f64>; 3],
}

impl Grid {
    /// Builds a grid from explicit face coordinates along each axis.
    ///
    /// Faces must be finite and strictly increasing, with at least one cell
    /// per axis.
    pub fn new(
        architecture: Architecture,
        topology: [Topology; 3],
        faces: [Array1<f64>; 3],
    ) -> Result<Self> {
        for (dim, f) in Dim3::ALL.iter().zip(faces.iter()) {
            if f.len() < 2 {
                return Err(TkeError::InvalidGrid(format!(
                    "axis {:?} needs at least two faces, got {}",
                    dim,
                    f.len()
                )));
            }
            if f.iter().any(|v| !v.is_finite()) {
                return Err(TkeError::InvalidGrid(format!(
                    "axis {:?} has non-finite face coordinates",
                    dim
                )));
            }
            if f.windows(2).into_iter().any(|w| w[1] <= w[0]) {
                return Err(TkeError::InvalidGrid(format!(
                    "axis {:?} faces are not strictly increasing",
                    dim
                )));
            }
        }

        let centers = [0, 1, 2].map(|d| cell_centers(faces[d].view()));
        let center_spacing = [0, 1, 2].map(|d| cell_widths(faces[d].view()));
        let face_spacing = [0, 1, 2].map(|d| {
            face_distances(
                faces[d].view(),
                centers[d].view(),
                center_spacing[d].view(),
                topology[d],
            )
        });

        Ok(Self {
            architecture,
            topology,
            faces,
            centers,
            center_spacing,
            face_spacing,
        })
    }

    /// Uniformly spaced CPU grid with faces running from 0 to `extent` on each axis.
    pub fn regular(size: [usize; 3], extent: [f64; 3], topology: [Topology; 3]) -> Result<Self> {
        let mut faces = [Array1::zeros(0), Array1::zeros(0), Array1::zeros(0)];
        for d in 0..3 {
            if size[d] == 0 {
                return Err(TkeError::InvalidGrid(format!(
                    "axis {:?} has zero cells",
                    Dim3::ALL[d]
                )));
            }
            faces[d] = Array1::linspace(0.0, extent[d], size[d] + 1);
        }
        Self::new(Architecture::Cpu, topology, faces)
    }

    /// Horizontally periodic, vertically bounded box: the usual LES layout.
    pub fn doubly_periodic(size: [usize; 3], extent: [f64; 3]) -> Result<Self> {
        Self::regular(
            size,
            extent,
            [Topology::Periodic, Topology::Periodic, Topology::Bounded],
        )
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn into_shared(self) -> Arc<Grid> {
        Arc::new(self)
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn topology(&self, dim: Dim3) -> Topology {
        self.topology[dim.index()]
    }

    /// Number of cells along `dim`.
    pub fn size(&self, dim: Dim3) -> usize {
        self.centers[dim.index()].len()
    }

    pub fn sizes(&self) -> [usize; 3] {
        [self.size(Dim3::X), self.size(Dim3::Y), self.size(Dim3::Z)]
    }

    /// Domain length along `dim`.
    pub fn extent(&self, dim: Dim3) -> f64 {
        let f = &self.faces[dim.index()];
        f[f.len() - 1] - f[0]
    }

    /// Number of nodes of `location` along `dim`.
    pub fn node_count(&self, dim: Dim3, location: Location) -> usize {
        let n = self.size(dim);
        match (location, self.topology(dim)) {
            (Location::Face, Topology::Bounded) => n + 1,
            _ => n,
        }
    }

    /// Array shape of a field at `location`.
    pub fn shape(&self, location: Loc3) -> (usize, usize, usize) {
        (
            self.node_count(Dim3::X, location[0]),
            self.node_count(Dim3::Y, location[1]),
            self.node_count(Dim3::Z, location[2]),
        )
    }

    /// Coordinates of the nodes of `location` along `dim`.
    pub fn nodes(&self, dim: Dim3, location: Location) -> ArrayView1<'_, f64> {
        match location {
            Location::Center => self.centers[dim.index()].view(),
            Location::Face => {
                let n = self.node_count(dim, Location::Face);
                self.faces[dim.index()].slice(ndarray::s![..n])
            }
        }
    }

    /// Metric spacing associated with each node of `location` along `dim`.
    pub fn spacings(&self, dim: Dim3, location: Location) -> ArrayView1<'_, f64> {
        match location {
            Location::Center => self.center_spacing[dim.index()].view(),
            Location::Face => self.face_spacing[dim.index()].view(),
        }
    }

    pub fn is_horizontally_periodic(&self) -> bool {
        self.topology(Dim3::X) == Topology::Periodic && self.topology(Dim3::Y) == Topology::Periodic
    }
}

/// True when both handles describe the same grid, by identity or by value.
pub fn same_grid(a: &Arc<Grid>, b: &Arc<Grid>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

pub(crate) fn ensure_same_grid(what: &str, reference: &Arc<Grid>, other: &Arc<Grid>) -> Result<()> {
    if same_grid(reference, other) {
        Ok(())
    } else {
        Err(TkeError::grid_mismatch(what))
    }
}

fn cell_centers(faces: ArrayView1<f64>) -> Array1<f64> {
    faces
        .windows(2)
        .into_iter()
        .map(|w| 0.5 * (w[0] + w[1]))
        .collect()
}

fn cell_widths(faces: ArrayView1<f64>) -> Array1<f64> {
    faces.windows(2).into_iter().map(|w| w[1] - w[0]).collect()
}

fn face_distances(
    faces: ArrayView1<f64>,
    centers: ArrayView1<f64>,
    widths: ArrayView1<f64>,
    topology: Topology,
) -> Array1<f64> {
    let n = centers.len();
    match topology {
        Topology::Periodic => {
            let length = faces[n] - faces[0];
            (0..n)
                .map(|i| {
                    if i == 0 {
                        centers[0] + length - centers[n - 1]
                    } else {
                        centers[i] - centers[i - 1]
                    }
                })
                .collect()
        }
        // Boundary faces borrow the width of the adjacent cell.
        Topology::Bounded => (0..=n)
            .map(|i| {
                if i == 0 {
                    widths[0]
                } else if i == n {
                    widths[n - 1]
                } else {
                    centers[i] - centers[i - 1]
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_regular_grid_node_counts() {
        let grid = Grid::doubly_periodic([4, 3, 5], [1.0, 1.0, 1.0]).unwrap();
        assert_eq!(grid.shape(CCC), (4, 3, 5));
        assert_eq!(grid.shape(FCC), (4, 3, 5));
        assert_eq!(grid.shape(CCF), (4, 3, 6));
        assert_eq!(grid.nodes(Dim3::Z, Location::Face).len(), 6);
        assert_eq!(grid.nodes(Dim3::X, Location::Face).len(), 4);
    }

    #[test]
    fn test_periodic_face_spacing_wraps() {
        let faces = [
            array![0.0, 1.0, 3.0, 6.0],
            array![0.0, 1.0],
            array![0.0, 1.0],
        ];
        let grid = Grid::new(
            Architecture::Cpu,
            [Topology::Periodic, Topology::Periodic, Topology::Bounded],
            faces,
        )
        .unwrap();
        let centers = grid.nodes(Dim3::X, Location::Center);
        assert_eq!(centers.to_vec(), vec![0.5, 2.0, 4.5]);
        let df = grid.spacings(Dim3::X, Location::Face);
        // Distance from the last center across the periodic seam to the first.
        assert!((df[0] - 2.0).abs() < 1e-14);
        assert!((df[1] - 1.5).abs() < 1e-14);
        assert!((df[2] - 2.5).abs() < 1e-14);
    }

    #[test]
    fn test_bounded_face_spacing_uses_adjacent_cells() {
        let grid = Grid::regular([2, 2, 4], [1.0, 1.0, 2.0], [Topology::Bounded; 3]).unwrap();
        let df = grid.spacings(Dim3::Z, Location::Face);
        assert_eq!(df.len(), 5);
        assert!(df.iter().all(|&d| (d - 0.5).abs() < 1e-14));
    }

    #[test]
    fn test_rejects_non_monotonic_faces() {
        let faces = [array![0.0, 1.0], array![0.0, 2.0, 1.0], array![0.0, 1.0]];
        let err = Grid::new(Architecture::Cpu, [Topology::Bounded; 3], faces).unwrap_err();
        assert!(matches!(err, TkeError::InvalidGrid(_)));
    }

    #[test]
    fn test_rejects_zero_cells() {
        let err = Grid::doubly_periodic([0, 2, 2], [1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, TkeError::InvalidGrid(_)));
    }

    #[test]
    fn test_same_grid_by_value() {
        let a = Grid::doubly_periodic([2, 2, 2], [1.0, 1.0, 1.0]).unwrap().into_shared();
        let b = Grid::doubly_periodic([2, 2, 2], [1.0, 1.0, 1.0]).unwrap().into_shared();
        let c = Grid::doubly_periodic([2, 2, 3], [1.0, 1.0, 1.0]).unwrap().into_shared();
        assert!(same_grid(&a, &b));
        assert!(!same_grid(&a, &c));
        let gpu = Arc::new((*a).clone().with_architecture(Architecture::Gpu));
        assert!(!same_grid(&a, &gpu));
    }
}
