//! Coordinate meshing: reconstructs the dense rectangular grid implied by a
//! set of per-slice coordinate tuples. The first tuple component is the
//! spatial ordering key; the remaining components span the non-spatial
//! dimensions of the grid.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MeshError {
    #[error("no slices to mesh")]
    Empty,

    #[error("{slices} slice(s) do not form a complete, duplicate-free {cells}-cell grid")]
    IncompleteGrid { slices: usize, cells: usize },

    #[error("slices at {page} have spatial coordinates {found:?}, expected {expected:?}")]
    GeometryInconsistency {
        page: String,
        expected: Vec<f64>,
        found: Vec<f64>,
    },
}

/// A meshed grid of slice indices.
#[derive(Debug)]
pub struct Mesh {
    /// Spatial coordinates shared by every page, sorted ascending.
    pub spatial: Vec<f64>,
    /// Distinct sorted values of each non-spatial axis.
    pub axes: Vec<Vec<f64>>,
    /// Input slice indices per page, spatial order within a page. Pages are
    /// ordered row-major over the non-spatial axes.
    pub pages: Vec<Vec<usize>>,
}

impl Mesh {
    /// Grid shape as (spatial size, non-spatial sizes...).
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.spatial.len()];
        shape.extend(self.axes.iter().map(Vec::len));
        shape
    }

    /// The non-spatial coordinate values of page `index`, row-major.
    pub fn page_coords(&self, index: usize) -> Vec<f64> {
        let mut coords = vec![0.0; self.axes.len()];
        let mut remainder = index;
        for (axis, values) in self.axes.iter().enumerate().rev() {
            coords[axis] = values[remainder % values.len()];
            remainder /= values.len();
        }
        coords
    }
}

/// Mesh a list of coordinate tuples into a dense grid.
///
/// Every tuple must have the same arity. The grid is complete when each
/// combination of non-spatial values owns the same number of slices with
/// pairwise distinct spatial coordinates, and consistent when every
/// combination sees the identical spatial coordinate vector. Float values
/// are compared bit-exact.
///
/// # Errors
///
/// [`MeshError::IncompleteGrid`] when the tuples do not form a complete,
/// duplicate-free Cartesian product; [`MeshError::GeometryInconsistency`]
/// when pages disagree on spatial sampling.
pub fn mesh(coords: &[Vec<f64>]) -> Result<Mesh, MeshError> {
    if coords.is_empty() || coords[0].is_empty() {
        return Err(MeshError::Empty);
    }
    let arity = coords[0].len();
    debug_assert!(coords.iter().all(|tuple| tuple.len() == arity));

    let mut axes: Vec<Vec<f64>> = Vec::with_capacity(arity.saturating_sub(1));
    for axis in 1..arity {
        let mut values: Vec<f64> = coords.iter().map(|tuple| tuple[axis]).collect();
        values.sort_by(f64::total_cmp);
        values.dedup_by(|a, b| a.to_bits() == b.to_bits());
        axes.push(values);
    }
    let page_count: usize = axes.iter().map(Vec::len).product();

    let slices = coords.len();
    let mut spatial_values: Vec<u64> = coords.iter().map(|tuple| tuple[0].to_bits()).collect();
    spatial_values.sort_unstable();
    spatial_values.dedup();
    let cells = spatial_values.len() * page_count;

    let per_page = slices / page_count;
    if per_page * page_count != slices {
        return Err(MeshError::IncompleteGrid { slices, cells });
    }

    let mut groups: HashMap<Vec<u64>, Vec<usize>> = HashMap::new();
    for (index, tuple) in coords.iter().enumerate() {
        let key: Vec<u64> = tuple[1..].iter().map(|value| value.to_bits()).collect();
        groups.entry(key).or_default().push(index);
    }
    if groups.len() != page_count {
        return Err(MeshError::IncompleteGrid { slices, cells });
    }

    let mut pages = Vec::with_capacity(page_count);
    for page in 0..page_count {
        let mut key = vec![0u64; arity - 1];
        let mut remainder = page;
        for axis in (0..arity - 1).rev() {
            let values = &axes[axis];
            key[axis] = values[remainder % values.len()].to_bits();
            remainder /= values.len();
        }
        let Some(members) = groups.get(&key) else {
            return Err(MeshError::IncompleteGrid { slices, cells });
        };
        if members.len() != per_page {
            return Err(MeshError::IncompleteGrid { slices, cells });
        }
        let mut members = members.clone();
        members.sort_by(|&a, &b| coords[a][0].total_cmp(&coords[b][0]));
        let duplicated = members
            .windows(2)
            .any(|pair| coords[pair[0]][0].to_bits() == coords[pair[1]][0].to_bits());
        if duplicated {
            return Err(MeshError::IncompleteGrid { slices, cells });
        }
        pages.push(members);
    }

    let spatial: Vec<f64> = pages[0].iter().map(|&index| coords[index][0]).collect();
    let mesh = Mesh {
        spatial,
        axes,
        pages,
    };
    for (page, members) in mesh.pages.iter().enumerate().skip(1) {
        let found: Vec<f64> = members.iter().map(|&index| coords[index][0]).collect();
        let consistent = found
            .iter()
            .zip(&mesh.spatial)
            .all(|(a, b)| a.to_bits() == b.to_bits());
        if !consistent {
            return Err(MeshError::GeometryInconsistency {
                page: format!("{:?}", mesh.page_coords(page)),
                expected: mesh.spatial.clone(),
                found,
            });
        }
    }
    Ok(mesh)
}
