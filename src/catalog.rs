use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use rayon::prelude::*;

use crate::dataset::{self, ScanExtra};
use crate::entity::{Entity, Label, Selector};
use crate::error::{Diagnostic, Error, Result};
use crate::record::{CatalogRecord, RecordStatus, SeriesAttributes};

/// Index of a DICOM folder: one record per instance file, keyed by the
/// file's path relative to the root. Mutations are staged in memory and hit
/// the disk on [`Catalog::close`] (commit) or [`Catalog::restore`]
/// (rollback).
#[derive(Debug)]
pub struct Catalog {
    pub(crate) root: PathBuf,
    pub(crate) records: BTreeMap<String, CatalogRecord>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Catalog {
    /// Open a DICOM folder, creating it if needed. Loads the persisted
    /// snapshot when one exists; otherwise, or when the snapshot is
    /// unreadable, rebuilds the index by scanning every file in the folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created or scanned. An
    /// unreadable snapshot is not an error: it is discarded and the index
    /// rebuilt.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let mut catalog = Self {
            root,
            records: BTreeMap::new(),
            diagnostics: Vec::new(),
        };
        let snapshot = catalog.snapshot_path();
        if snapshot.exists() {
            match catalog.load_snapshot(&snapshot) {
                Ok(()) => {
                    log::info!(
                        "opened {} with {} record(s) from snapshot",
                        catalog.root.display(),
                        catalog.records.len()
                    );
                    return Ok(catalog);
                }
                Err(err) => {
                    log::warn!(
                        "snapshot {} is unreadable ({err}), rebuilding the index",
                        snapshot.display()
                    );
                    let _ = fs::remove_file(&snapshot);
                }
            }
        }
        catalog.rebuild()?;
        Ok(catalog)
    }

    /// The folder this catalog indexes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Address of the whole archive.
    pub fn root_entity(&self) -> Entity {
        Entity::root(&self.root)
    }

    /// Warnings collected while loading, such as multiframe files that
    /// could not be converted and were dropped from the index.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The record stored under a catalog key.
    pub fn record(&self, key: &str) -> Option<&CatalogRecord> {
        self.records.get(key)
    }

    fn snapshot_path(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        self.root.join(format!("{name}.json"))
    }

    fn load_snapshot(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)?;
        self.records =
            serde_json::from_str(&text).map_err(|err| Error::Snapshot(err.to_string()))?;
        Ok(())
    }

    fn save_snapshot(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.records)
            .map_err(|err| Error::Snapshot(err.to_string()))?;
        fs::write(self.snapshot_path(), text)?;
        Ok(())
    }

    /// Scan the folder and rebuild the index from scratch, then run the
    /// normalization passes.
    fn rebuild(&mut self) -> Result<()> {
        log::info!("scanning {}", self.root.display());
        let snapshot = self.snapshot_path();
        let mut files = Vec::new();
        collect_files(&self.root, &snapshot, &mut files)?;

        let scanned: Vec<(String, CatalogRecord, ScanExtra)> = files
            .par_iter()
            .filter_map(|path| match dataset::scan_file(path, &self.root) {
                Ok(scan) => Some(scan),
                Err(err) => {
                    log::debug!("skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();

        self.records.clear();
        let mut extras: HashMap<String, ScanExtra> = HashMap::new();
        for (key, record, extra) in scanned {
            extras.insert(key.clone(), extra);
            self.records.insert(key, record);
        }
        log::info!("indexed {} instance(s)", self.records.len());

        self.convert_multiframe(&mut extras)?;
        self.split_mixed_series(&extras)?;
        Ok(())
    }

    /// Replace every multiframe record by one record per frame. A file that
    /// cannot be converted is dropped from the index, left on disk, and
    /// reported through [`Catalog::diagnostics`].
    fn convert_multiframe(&mut self, extras: &mut HashMap<String, ScanExtra>) -> Result<()> {
        let multiframe: Vec<String> = self
            .records
            .keys()
            .filter(|key| {
                extras
                    .get(*key)
                    .and_then(|extra| extra.frames)
                    .is_some_and(|frames| frames > 1)
            })
            .cloned()
            .collect();
        for key in multiframe {
            let path = self.root.join(&key);
            log::info!("converting multiframe file {}", path.display());
            let produced = dataset::split_multiframe(&path).unwrap_or_default();
            if produced.is_empty() {
                log::warn!(
                    "multiframe conversion of {} failed, dropping it from the index",
                    path.display()
                );
                self.diagnostics.push(Diagnostic {
                    file: path,
                    message: "multiframe conversion failed; file dropped from the index".into(),
                });
            } else {
                for file in &produced {
                    match dataset::scan_file(file, &self.root) {
                        Ok((new_key, record, extra)) => {
                            extras.insert(new_key.clone(), extra);
                            self.records.insert(new_key, record);
                        }
                        Err(err) => log::warn!("cannot index {}: {err}", file.display()),
                    }
                }
                fs::remove_file(&path)?;
            }
            self.records.remove(&key);
        }
        Ok(())
    }

    /// Move instances so that every series holds a single SOP class. Each
    /// extra class found in a series is copied into a new sibling series
    /// and the originals are deleted.
    fn split_mixed_series(&mut self, extras: &HashMap<String, ScanExtra>) -> Result<()> {
        let all_series = self.series(&self.root_entity(), &Selector::any())?;
        for series in all_series {
            let keys = self.index(&series);
            let mut classes: Vec<String> = Vec::new();
            for key in &keys {
                let class = extras
                    .get(key)
                    .and_then(|extra| extra.sop_class.clone())
                    .unwrap_or_default();
                if !classes.contains(&class) {
                    classes.push(class);
                }
            }
            if classes.len() < 2 {
                continue;
            }
            log::info!("splitting {series}: {} SOP classes", classes.len());
            let description = keys
                .first()
                .and_then(|key| self.records[key].series_description.clone())
                .unwrap_or_default();
            for (offset, class) in classes.iter().enumerate().skip(1) {
                let moved: Vec<String> = keys
                    .iter()
                    .filter(|key| {
                        extras
                            .get(*key)
                            .and_then(|extra| extra.sop_class.as_deref())
                            .unwrap_or_default()
                            == class
                    })
                    .cloned()
                    .collect();
                let files: Vec<PathBuf> = moved.iter().map(|key| self.root.join(key)).collect();
                let sibling = series.with_label(Label::name(format!("{description} [{offset}]")));
                self.files_to_series(&files, &sibling)?;
                for key in moved {
                    self.records.remove(&key);
                    let _ = fs::remove_file(self.root.join(&key));
                }
            }
        }
        Ok(())
    }

    /// Commit the session: staged removals are deleted from disk and
    /// dropped, staged creations become part of the committed state, and
    /// the snapshot is persisted.
    pub fn close(&mut self) -> Result<()> {
        let removed: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_removed())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            let path = self.root.join(key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            self.records.remove(key);
        }
        for record in self.records.values_mut() {
            if record.status == RecordStatus::PendingCreate {
                record.status = RecordStatus::Clean;
            }
        }
        self.save_snapshot()?;
        log::info!(
            "committed {}: {} record(s), {} removed",
            self.root.display(),
            self.records.len(),
            removed.len()
        );
        Ok(())
    }

    /// Roll the session back to the last committed state: files created in
    /// this session are deleted and their records dropped, staged removals
    /// are cleared, and the snapshot is persisted.
    pub fn restore(&mut self) -> Result<()> {
        let created: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_created())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &created {
            let path = self.root.join(key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            self.records.remove(key);
        }
        for record in self.records.values_mut() {
            if record.status == RecordStatus::PendingRemove {
                record.status = RecordStatus::Clean;
            }
        }
        self.save_snapshot()?;
        log::info!(
            "restored {}: {} record(s), {} creation(s) undone",
            self.root.display(),
            self.records.len(),
            created.len()
        );
        Ok(())
    }

    /// Append a freshly written instance to the index as a staged creation.
    pub(crate) fn append(&mut self, key: String, mut record: CatalogRecord) {
        record.status = RecordStatus::PendingCreate;
        self.records.insert(key, record);
    }

    /// Stage the given records for deletion.
    pub(crate) fn mark_removed(&mut self, keys: &[String]) {
        for key in keys {
            if let Some(record) = self.records.get_mut(key) {
                record.stage_removal();
            }
        }
    }

    fn visible(&self) -> impl Iterator<Item = (&String, &CatalogRecord)> {
        self.records.iter().filter(|(_, record)| !record.is_removed())
    }

    /// Distinct patients, optionally filtered on PatientName.
    pub fn patients(&self, selector: &Selector) -> Vec<Entity> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for (_, record) in self.visible() {
            if !selector.admits(record.patient_name.as_deref()) {
                continue;
            }
            let pair = (record.patient_id.clone(), record.patient_name.clone());
            if seen.insert(pair) {
                found.push(self.root_entity().child(Label::key(&record.patient_id)));
            }
        }
        found
    }

    /// Distinct studies under the root or one patient, optionally filtered
    /// on StudyDescription.
    ///
    /// # Errors
    ///
    /// Returns an error for study or series addresses.
    pub fn studies(&self, entity: &Entity, selector: &Selector) -> Result<Vec<Entity>> {
        match entity {
            Entity::Root(_) => {
                let mut found = Vec::new();
                for patient in self.patients(&Selector::any()) {
                    found.extend(self.studies(&patient, selector)?);
                }
                Ok(found)
            }
            Entity::Patient { .. } => {
                let mut seen = HashSet::new();
                let mut found = Vec::new();
                for (_, record) in self.visible() {
                    if !record.within(entity)
                        || !selector.admits(record.study_description.as_deref())
                    {
                        continue;
                    }
                    if seen.insert(record.study_uid.clone()) {
                        found.push(entity.child(Label::key(&record.study_uid)));
                    }
                }
                Ok(found)
            }
            _ => Err(Error::InvalidAddress(format!(
                "{entity} is not an archive or patient address"
            ))),
        }
    }

    /// Distinct series under the root, a patient or a study, optionally
    /// filtered on SeriesDescription.
    ///
    /// # Errors
    ///
    /// Returns an error for series addresses.
    pub fn series(&self, entity: &Entity, selector: &Selector) -> Result<Vec<Entity>> {
        match entity {
            Entity::Root(_) | Entity::Patient { .. } => {
                let mut found = Vec::new();
                for study in self.studies(entity, &Selector::any())? {
                    found.extend(self.series(&study, selector)?);
                }
                Ok(found)
            }
            Entity::Study { .. } => {
                let mut seen = HashSet::new();
                let mut found = Vec::new();
                for (_, record) in self.visible() {
                    if !record.within(entity)
                        || !selector.admits(record.series_description.as_deref())
                    {
                        continue;
                    }
                    if seen.insert(record.series_uid.clone()) {
                        found.push(entity.child(Label::key(&record.series_uid)));
                    }
                }
                Ok(found)
            }
            Entity::Series { .. } => Err(Error::InvalidAddress(format!(
                "{entity} is not an archive, patient or study address"
            ))),
        }
    }

    /// Absolute paths of the entity's instance files, in path order.
    pub fn files(&self, entity: &Entity) -> Vec<PathBuf> {
        self.visible()
            .filter(|(_, record)| record.within(entity))
            .map(|(key, _)| self.root.join(key))
            .collect()
    }

    /// Catalog keys of the entity's records, in path order.
    pub fn index(&self, entity: &Entity) -> Vec<String> {
        self.visible()
            .filter(|(_, record)| record.within(entity))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Distinct, sorted values of arbitrary attributes over an entity's
    /// files, read through the codec. Values come back in their string
    /// rendition, one list per requested attribute.
    ///
    /// # Errors
    ///
    /// Returns an error when a file cannot be read.
    pub fn unique(&self, attributes: &[&str], entity: &Entity) -> Result<Vec<(String, Vec<String>)>> {
        let mut sets: Vec<std::collections::BTreeSet<String>> =
            vec![Default::default(); attributes.len()];
        for file in self.files(entity) {
            let object = dataset::read_dataset(&file)?;
            for (slot, name) in attributes.iter().enumerate() {
                if let Some(value) = dataset::string_by_name(&object, name) {
                    sets[slot].insert(value);
                }
            }
        }
        Ok(attributes
            .iter()
            .zip(sets)
            .map(|(name, values)| (name.to_string(), values.into_iter().collect()))
            .collect())
    }

    pub(crate) fn max_series_number(&self, study_uid: &str) -> i32 {
        self.visible()
            .filter(|(_, record)| record.study_uid == study_uid)
            .filter_map(|(_, record)| record.series_number)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn max_instance_number(&self, series_uid: &str) -> i32 {
        self.visible()
            .filter(|(_, record)| record.series_uid == series_uid)
            .filter_map(|(_, record)| record.instance_number)
            .max()
            .unwrap_or(0)
    }

    /// Description of an existing entity, read from its first record; falls
    /// back to the address label text.
    pub(crate) fn description_of(&self, entity: &Entity) -> String {
        let described = self.visible().find_map(|(_, record)| {
            if !record.within(entity) {
                return None;
            }
            match entity {
                Entity::Study { .. } => record.study_description.clone(),
                Entity::Series { .. } => record.series_description.clone(),
                _ => record.patient_name.clone(),
            }
        });
        described.unwrap_or_else(|| {
            entity
                .label()
                .map(|label| label.text().to_string())
                .unwrap_or_default()
        })
    }

    /// Resolve the attributes to stamp onto instances written into a
    /// series. Levels that already have files contribute the attributes of
    /// their first file, so appended instances inherit the existing UID
    /// chain; levels that do not exist yet get freshly synthesized values.
    pub(crate) fn series_attributes(&self, series: &Entity) -> SeriesAttributes {
        let mut attributes = match series.parent() {
            Some(study) => self.study_attributes(&study),
            None => SeriesAttributes::default(),
        };
        let files = self.files(series);
        if let Some(first) = files.first()
            && let Ok(object) = dataset::read_dataset(first)
        {
            attributes.series_uid = dataset::string_value(&object, tags::SERIES_INSTANCE_UID);
            attributes.series_description =
                dataset::string_value(&object, tags::SERIES_DESCRIPTION);
            attributes.series_number = dataset::int_value(&object, tags::SERIES_NUMBER);
            return attributes;
        }
        attributes.series_uid = Some(dataset::new_uid());
        attributes.series_description = series
            .label()
            .map(|label| label.text().to_string());
        attributes.series_number = Some(
            1 + self.max_series_number(attributes.study_uid.as_deref().unwrap_or_default()),
        );
        attributes
    }

    fn study_attributes(&self, study: &Entity) -> SeriesAttributes {
        let mut attributes = match study.parent() {
            Some(patient) => self.patient_attributes(&patient),
            None => SeriesAttributes::default(),
        };
        let files = self.files(study);
        if let Some(first) = files.first()
            && let Ok(object) = dataset::read_dataset(first)
        {
            attributes.study_uid = dataset::string_value(&object, tags::STUDY_INSTANCE_UID);
            attributes.study_description = dataset::string_value(&object, tags::STUDY_DESCRIPTION);
            attributes.study_date = dataset::string_value(&object, tags::STUDY_DATE);
            return attributes;
        }
        attributes.study_uid = Some(dataset::new_uid());
        attributes.study_description = study.label().map(|label| label.text().to_string());
        attributes.study_date = Some(chrono::Local::now().format("%Y%m%d").to_string());
        attributes
    }

    fn patient_attributes(&self, patient: &Entity) -> SeriesAttributes {
        let mut attributes = SeriesAttributes::default();
        let files = self.files(patient);
        if let Some(first) = files.first()
            && let Ok(object) = dataset::read_dataset(first)
        {
            attributes.patient_id = dataset::string_value(&object, tags::PATIENT_ID);
            attributes.patient_name = dataset::string_value(&object, tags::PATIENT_NAME);
            return attributes;
        }
        attributes.patient_id = Some(dataset::new_uid());
        attributes.patient_name = patient.label().map(|label| label.text().to_string());
        attributes
    }
}

fn collect_files(directory: &Path, snapshot: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, snapshot, found)?;
        } else if path != snapshot {
            found.push(path);
        }
    }
    Ok(())
}
