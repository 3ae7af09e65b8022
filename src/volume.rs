use ndarray::{Array2, Array3, ArrayD, Axis, IxDyn, s};

use crate::error::{Error, Result};
use crate::mesh::Mesh;

/// One 2-D spatial slice, tagged with its spatial position and, for slices
/// taken out of a higher-dimensional volume, the coordinate values of the
/// non-spatial axes it belongs to.
#[derive(Debug, Clone)]
pub struct Slice {
    data: Array2<u16>,
    location: f64,
    coords: Vec<(String, f64)>,
}

impl Slice {
    pub fn new(data: Array2<u16>, location: f64) -> Self {
        Self {
            data,
            location,
            coords: Vec::new(),
        }
    }

    pub fn data(&self) -> &Array2<u16> {
        &self.data
    }

    pub fn location(&self) -> f64 {
        self.location
    }

    /// Non-spatial axis labels and coordinate values, empty for slices of a
    /// plain 3-D volume.
    pub fn coords(&self) -> &[(String, f64)] {
        &self.coords
    }
}

/// A dense volume assembled from 2-D slices. Plain series come out 3-D with
/// shape (depth, height, width); series spanning non-spatial dimensions come
/// out N-D with the non-spatial axes leading.
#[derive(Debug, Clone)]
pub struct Volume {
    data: ArrayD<u16>,
    spacing: (f32, f32, f32),
    positions: Vec<f64>,
    axes: Vec<(String, Vec<f64>)>,
    coords: Vec<(String, f64)>,
}

impl Volume {
    /// Stack ordered slices into a 3-D volume.
    ///
    /// # Errors
    ///
    /// Returns an error if no slices are given or the slices do not share
    /// one pixel shape.
    pub fn stack(slices: &[Slice], spacing: (f32, f32, f32)) -> Result<Self> {
        if slices.is_empty() {
            return Err(Error::NoInstances("volume stack".into()));
        }
        let (height, width) = slices[0].data.dim();
        if slices.iter().any(|slice| slice.data.dim() != (height, width)) {
            return Err(Error::InconsistentDimensions("volume stack".into()));
        }
        let depth = slices.len();
        let mut data = Array3::<u16>::zeros((depth, height, width));
        for (index, slice) in slices.iter().enumerate() {
            data.slice_mut(s![index, .., ..]).assign(&slice.data);
        }
        Ok(Self {
            data: data.into_dyn(),
            spacing,
            positions: slices.iter().map(Slice::location).collect(),
            axes: Vec::new(),
            coords: Vec::new(),
        })
    }

    /// Assemble slices into a volume following a meshed grid: one 3-D block
    /// per page, pages laid out row-major along the leading non-spatial
    /// axes. `labels` names the non-spatial axes in mesh order.
    pub(crate) fn assemble(
        mesh: &Mesh,
        slices: &[Array2<u16>],
        spacing: (f32, f32, f32),
        labels: &[&str],
    ) -> Result<Self> {
        let (height, width) = slices[0].dim();
        let mut shape: Vec<usize> = mesh.axes.iter().map(Vec::len).collect();
        shape.extend([mesh.spatial.len(), height, width]);

        let mut flat = Vec::with_capacity(shape.iter().product());
        for page in &mesh.pages {
            for &index in page {
                flat.extend(slices[index].iter().copied());
            }
        }
        let data = ArrayD::from_shape_vec(IxDyn(&shape), flat)
            .map_err(|err| Error::Codec(err.to_string()))?;
        Ok(Self {
            data,
            spacing,
            positions: mesh.spatial.clone(),
            axes: labels
                .iter()
                .zip(&mesh.axes)
                .map(|(label, values)| (label.to_string(), values.clone()))
                .collect(),
            coords: Vec::new(),
        })
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data(&self) -> &ArrayD<u16> {
        &self.data
    }

    /// Voxel spacing as (column, row, slice) distances.
    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Spatial coordinate of each slice, ascending.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Non-spatial axis labels and their coordinate values.
    pub fn axes(&self) -> &[(String, Vec<f64>)] {
        &self.axes
    }

    /// Fixed non-spatial coordinates of a sub-volume produced by
    /// [`Volume::separate`].
    pub fn coords(&self) -> &[(String, f64)] {
        &self.coords
    }

    /// Split a 3-D volume into its ordered spatial slices. Volumes of any
    /// other dimensionality yield no slices.
    pub fn split(&self) -> Vec<Slice> {
        if self.data.ndim() != 3 {
            return Vec::new();
        }
        (0..self.data.len_of(Axis(0)))
            .filter_map(|index| {
                let plane = self
                    .data
                    .index_axis(Axis(0), index)
                    .to_owned()
                    .into_dimensionality::<ndarray::Ix2>()
                    .ok()?;
                Some(Slice {
                    data: plane,
                    location: self.positions.get(index).copied().unwrap_or(index as f64),
                    coords: self.coords.clone(),
                })
            })
            .collect()
    }

    /// Separate an N-D volume into its 3-D sub-volumes, row-major over the
    /// non-spatial axes. Each sub-volume carries the coordinate values of
    /// the page it came from. A 3-D volume separates into itself.
    pub fn separate(&self) -> Vec<Volume> {
        if self.axes.is_empty() || self.data.ndim() <= 3 {
            return vec![self.clone()];
        }
        let page_count: usize = self.axes.iter().map(|(_, values)| values.len()).product();
        (0..page_count)
            .map(|page| {
                let mut indices = vec![0usize; self.axes.len()];
                let mut remainder = page;
                for (axis, (_, values)) in self.axes.iter().enumerate().rev() {
                    indices[axis] = remainder % values.len();
                    remainder /= values.len();
                }
                let coords: Vec<(String, f64)> = self
                    .axes
                    .iter()
                    .zip(&indices)
                    .map(|((label, values), &index)| (label.clone(), values[index]))
                    .collect();

                let mut view = self.data.view();
                for &index in &indices {
                    view = view.index_axis_move(Axis(0), index);
                }
                Volume {
                    data: view.to_owned(),
                    spacing: self.spacing,
                    positions: self.positions.clone(),
                    axes: Vec::new(),
                    coords,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn plane(fill: u16) -> Array2<u16> {
        Array2::from_elem((2, 3), fill)
    }

    #[test]
    fn stack_then_split_round_trips() {
        let slices = vec![
            Slice::new(plane(1), -4.0),
            Slice::new(plane(2), 0.0),
            Slice::new(plane(3), 4.0),
        ];
        let volume = Volume::stack(&slices, (1.0, 1.0, 4.0)).unwrap();
        assert_eq!(volume.shape(), &[3, 2, 3]);
        assert_eq!(volume.positions(), &[-4.0, 0.0, 4.0]);

        let back = volume.split();
        assert_eq!(back.len(), 3);
        for (original, reread) in slices.iter().zip(&back) {
            assert_eq!(original.data(), reread.data());
            assert_eq!(original.location(), reread.location());
        }
    }

    #[test]
    fn stack_rejects_mixed_shapes() {
        let slices = vec![
            Slice::new(Array2::zeros((2, 3)), 0.0),
            Slice::new(Array2::zeros((3, 2)), 1.0),
        ];
        assert!(matches!(
            Volume::stack(&slices, (1.0, 1.0, 1.0)),
            Err(Error::InconsistentDimensions(_))
        ));
    }

    #[test]
    fn separate_walks_pages_row_major() {
        let mesh = crate::mesh::mesh(&[
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
        ])
        .unwrap();
        let slices = vec![plane(10), plane(11), plane(20), plane(21)];
        let volume = Volume::assemble(&mesh, &slices, (1.0, 1.0, 1.0), &["EchoTime"]).unwrap();
        assert_eq!(volume.shape(), &[2, 2, 2, 3]);
        assert_eq!(volume.axes(), &[("EchoTime".to_string(), vec![0.0, 1.0])]);

        let subs = volume.separate();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].coords(), &[("EchoTime".to_string(), 0.0)]);
        assert_eq!(subs[1].coords(), &[("EchoTime".to_string(), 1.0)]);
        assert_eq!(subs[0].shape(), &[2, 2, 3]);
        assert_eq!(subs[0].data()[[0, 0, 0]], 10);
        assert_eq!(subs[0].data()[[1, 0, 0]], 11);
        assert_eq!(subs[1].data()[[0, 0, 0]], 20);

        let slices = subs[1].split();
        assert_eq!(slices[0].coords(), &[("EchoTime".to_string(), 1.0)]);
        assert_eq!(slices[0].location(), 0.0);
        assert_eq!(slices[1].location(), 1.0);
    }

    #[test]
    fn split_of_a_four_dimensional_volume_is_empty() {
        let volume = {
            let mesh = crate::mesh::mesh(&[
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 1.0],
            ])
            .unwrap();
            let slices = vec![plane(0), plane(1), plane(2), plane(3)];
            Volume::assemble(&mesh, &slices, (1.0, 1.0, 1.0), &["FlipAngle"]).unwrap()
        };
        assert!(volume.split().is_empty());
        assert_eq!(volume.separate().len(), 2);
    }
}
