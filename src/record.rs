use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// Staging state of one catalog record. The snapshot only ever contains
/// committed records, so the status is not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordStatus {
    /// Part of the last committed state.
    #[default]
    Clean,
    /// Appended this session; the file is on disk but not committed.
    PendingCreate,
    /// Staged for deletion; the file stays on disk until commit.
    PendingRemove,
    /// Appended this session and then staged for removal again. Commit and
    /// rollback both delete it.
    Discarded,
}

/// One indexed instance file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub patient_id: String,
    pub patient_name: Option<String>,
    pub study_uid: String,
    pub study_description: Option<String>,
    pub study_date: Option<String>,
    pub series_uid: String,
    pub series_description: Option<String>,
    pub series_number: Option<i32>,
    pub sop_uid: String,
    pub instance_number: Option<i32>,
    #[serde(skip)]
    pub status: RecordStatus,
}

impl CatalogRecord {
    /// Whether the record is staged for deletion and therefore hidden from
    /// all queries.
    pub fn is_removed(&self) -> bool {
        matches!(
            self.status,
            RecordStatus::PendingRemove | RecordStatus::Discarded
        )
    }

    /// Whether the record was appended in this session.
    pub fn is_created(&self) -> bool {
        matches!(
            self.status,
            RecordStatus::PendingCreate | RecordStatus::Discarded
        )
    }

    /// Stage the record for deletion. No-op if already staged.
    pub(crate) fn stage_removal(&mut self) {
        self.status = match self.status {
            RecordStatus::Clean => RecordStatus::PendingRemove,
            RecordStatus::PendingCreate => RecordStatus::Discarded,
            status => status,
        };
    }

    /// Whether the record belongs to the addressed entity.
    pub fn within(&self, entity: &Entity) -> bool {
        match entity {
            Entity::Root(_) => true,
            Entity::Patient { label, .. } => self.matches_patient(label),
            Entity::Study { patient, label, .. } => {
                self.matches_patient(patient) && self.matches_study(label)
            }
            Entity::Series {
                patient,
                study,
                label,
                ..
            } => {
                self.matches_patient(patient)
                    && self.matches_study(study)
                    && label.matches(&self.series_uid, self.series_description.as_deref())
            }
        }
    }

    fn matches_patient(&self, label: &crate::entity::Label) -> bool {
        label.matches(&self.patient_id, self.patient_name.as_deref())
    }

    fn matches_study(&self, label: &crate::entity::Label) -> bool {
        label.matches(&self.study_uid, self.study_description.as_deref())
    }
}

/// Attribute set resolved for a destination series, stamped onto every
/// instance written into it. Absent values are left untouched on the
/// template dataset.
#[derive(Debug, Clone, Default)]
pub struct SeriesAttributes {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_uid: Option<String>,
    pub study_description: Option<String>,
    pub study_date: Option<String>,
    pub series_uid: Option<String>,
    pub series_description: Option<String>,
    pub series_number: Option<i32>,
}
