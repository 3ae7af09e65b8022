use std::path::PathBuf;

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

use crate::catalog::Catalog;
use crate::dataset;
use crate::entity::{Entity, Label, Selector};
use crate::error::{Error, Result};
use crate::mesh::{self, MeshError};
use crate::record::SeriesAttributes;
use crate::volume::Volume;

impl Catalog {
    /// Copy a patient, study or series to a destination address of the same
    /// depth. Destination entities that do not exist yet are created, and
    /// every copied instance gets a fresh SOPInstanceUID and the next free
    /// InstanceNumber in its destination series. A destination under a
    /// different root is written through a separately opened catalog and
    /// committed there.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] when the address depths differ; IO and
    /// codec errors can leave some destination files already written.
    pub fn copy(&mut self, from: &Entity, to: &Entity) -> Result<()> {
        match (from.depth(), to.depth()) {
            (4, 4) => self.copy_series(from, to),
            (3, 3) => self.copy_study(from, to),
            (2, 2) => self.copy_patient(from, to),
            _ => Err(Error::ShapeMismatch {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Stage every record under the address for deletion. Files stay on
    /// disk until [`Catalog::close`].
    pub fn delete(&mut self, entity: &Entity) {
        let keys = self.index(entity);
        log::info!("staging {} record(s) of {entity} for deletion", keys.len());
        self.mark_removed(&keys);
    }

    /// Copy an entity, then stage the source for deletion. The deletion is
    /// staged even when the copy failed partway; the copy's result is
    /// returned so callers can tell.
    pub fn move_entity(&mut self, from: &Entity, to: &Entity) -> Result<()> {
        let copied = self.copy(from, to);
        self.delete(from);
        copied
    }

    fn copy_patient(&mut self, from: &Entity, to: &Entity) -> Result<()> {
        for study in self.studies(from, &Selector::any())? {
            let description = self.description_of(&study);
            self.copy_study(&study, &to.child(Label::name(description)))?;
        }
        Ok(())
    }

    fn copy_study(&mut self, from: &Entity, to: &Entity) -> Result<()> {
        for series in self.series(from, &Selector::any())? {
            let description = self.description_of(&series);
            self.copy_series(&series, &to.child(Label::name(description)))?;
        }
        Ok(())
    }

    fn copy_series(&mut self, from: &Entity, to: &Entity) -> Result<()> {
        let files = self.files(from);
        if to.root_path() == self.root {
            self.files_to_series(&files, to)
        } else {
            let mut destination = Catalog::open(to.root_path())?;
            destination.files_to_series(&files, to)?;
            destination.close()
        }
    }

    /// Write the given files into a destination series of this catalog,
    /// re-identifying each instance.
    pub(crate) fn files_to_series(&mut self, files: &[PathBuf], to: &Entity) -> Result<()> {
        let attributes = self.series_attributes(to);
        let start = self
            .max_instance_number(attributes.series_uid.as_deref().unwrap_or_default());
        log::info!("copying {} file(s) into {to}", files.len());
        for (offset, file) in files.iter().enumerate() {
            let mut instance = dataset::read_dataset(file)?;
            self.write_instance(&mut instance, &attributes, start + 1 + offset as i32)?;
            log::debug!("copied {} ({}/{})", file.display(), offset + 1, files.len());
        }
        Ok(())
    }

    /// Stamp a dataset with the destination attributes and a fresh instance
    /// identity, write it under a new relative path and index it as a
    /// staged creation.
    fn write_instance(
        &mut self,
        instance: &mut InMemDicomObject,
        attributes: &SeriesAttributes,
        instance_number: i32,
    ) -> Result<()> {
        let sop_uid = dataset::new_uid();
        dataset::stamp(instance, attributes, &sop_uid, instance_number);
        let key = format!("dicom-archive/{}.dcm", dataset::new_uid());
        dataset::write_dataset(instance, &self.root.join(&key))?;
        self.append(key, dataset::record_of(instance));
        Ok(())
    }

    /// Assemble the instances of a series into a dense volume. The slices
    /// are ordered by SliceLocation; `dims` names additional non-spatial
    /// coordinate attributes spanning the higher dimensions.
    ///
    /// # Errors
    ///
    /// [`Error::IncompleteGrid`] or [`Error::GeometryInconsistency`] when
    /// the coordinates do not form a consistent dense grid,
    /// [`Error::InconsistentDimensions`] when the pixel shapes differ, and
    /// read errors for unreadable files.
    pub fn volume(&self, series: &Entity, dims: &[&str], multislice: bool) -> Result<Volume> {
        if series.depth() != 4 {
            return Err(Error::InvalidAddress(format!(
                "{series} is not a series address"
            )));
        }
        let files = self.files(series);
        if files.is_empty() {
            return Err(Error::NoInstances(series.to_string()));
        }
        log::info!("reading volume from {series} ({} file(s))", files.len());

        let mut coords = Vec::with_capacity(files.len());
        let mut slices = Vec::with_capacity(files.len());
        let mut spacing = None;
        for file in &files {
            let object = dataset::read_file(file)?;
            let mut tuple = Vec::with_capacity(1 + dims.len());
            tuple.push(
                dataset::float_value(&object, tags::SLICE_LOCATION).ok_or_else(|| {
                    Error::Codec(format!("{}: missing SliceLocation", file.display()))
                })?,
            );
            for name in dims {
                tuple.push(dataset::float_by_name(&object, name).ok_or_else(|| {
                    Error::Codec(format!("{}: missing {name}", file.display()))
                })?);
            }
            coords.push(tuple);
            slices.push(dataset::pixel_slice(&object)?);
            if spacing.is_none() {
                spacing = dataset::spacing(&object, multislice);
            }
        }

        let mesh = mesh::mesh(&coords).map_err(|err| mesh_failure(series, err))?;
        let shape = slices[0].dim();
        if slices.iter().any(|slice| slice.dim() != shape) {
            return Err(Error::InconsistentDimensions(series.to_string()));
        }
        let spacing = spacing.unwrap_or_else(|| {
            let step = if mesh.spatial.len() > 1 {
                (mesh.spatial[1] - mesh.spatial[0]).abs() as f32
            } else {
                1.0
            };
            (1.0, 1.0, if step > 0.0 { step } else { 1.0 })
        });
        Volume::assemble(&mesh, &slices, spacing, dims)
    }

    /// Write a volume into a series, one instance per spatial slice. The
    /// metadata template comes from the first file of `reference` when
    /// given, from a synthesized MR dataset otherwise. Sub-volumes of an
    /// N-D volume are written in page order with one continuous
    /// InstanceNumber sequence, each instance stamped with its non-spatial
    /// coordinate values.
    ///
    /// # Errors
    ///
    /// Returns an error when the template or a destination file cannot be
    /// written; instances already written stay in place as staged
    /// creations.
    pub fn write_volume(
        &mut self,
        volume: &Volume,
        series: &Entity,
        reference: Option<&Entity>,
        multislice: bool,
    ) -> Result<()> {
        if series.depth() != 4 {
            return Err(Error::InvalidAddress(format!(
                "{series} is not a series address"
            )));
        }
        let mut template = match reference {
            None => dataset::template(),
            Some(reference) => {
                let files = if reference.root_path() == self.root {
                    self.files(reference)
                } else {
                    Catalog::open(reference.root_path())?.files(reference)
                };
                match files.first() {
                    Some(first) => dataset::read_dataset(first)?,
                    None => dataset::template(),
                }
            }
        };

        let attributes = self.series_attributes(series);
        let start = self
            .max_instance_number(attributes.series_uid.as_deref().unwrap_or_default());
        let sub_volumes = volume.separate();
        log::info!(
            "writing volume into {series} ({} sub-volume(s))",
            sub_volumes.len()
        );
        let mut written = 0;
        for sub_volume in &sub_volumes {
            for slice in sub_volume.split() {
                dataset::apply_slice(&mut template, &slice, sub_volume.spacing(), multislice);
                for (name, value) in slice.coords() {
                    dataset::set_float_by_name(&mut template, name, *value)?;
                }
                self.write_instance(&mut template, &attributes, start + 1 + written)?;
                written += 1;
            }
        }
        log::debug!("wrote {written} instance(s) into {series}");
        Ok(())
    }
}

fn mesh_failure(entity: &Entity, err: MeshError) -> Error {
    match err {
        MeshError::Empty => Error::NoInstances(entity.to_string()),
        MeshError::IncompleteGrid { slices, cells } => Error::IncompleteGrid {
            entity: entity.to_string(),
            slices,
            cells,
        },
        MeshError::GeometryInconsistency {
            page,
            expected,
            found,
        } => Error::GeometryInconsistency {
            entity: entity.to_string(),
            detail: format!("page {page} has {found:?}, expected {expected:?}"),
        },
    }
}
