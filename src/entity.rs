use std::fmt;
use std::path::{Path, PathBuf};

/// One level of a hierarchical address. A `Key` matches the level's unique
/// identifier (PatientID, StudyInstanceUID, SeriesInstanceUID); a `Name`
/// matches the level's descriptive attribute (PatientName, StudyDescription,
/// SeriesDescription) and doubles as the description given to an entity that
/// does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    Key(String),
    Name(String),
}

impl Label {
    pub fn key(value: impl Into<String>) -> Self {
        Self::Key(value.into())
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::Name(value.into())
    }

    /// The label text, regardless of kind.
    pub fn text(&self) -> &str {
        match self {
            Self::Key(value) | Self::Name(value) => value,
        }
    }

    pub(crate) fn matches(&self, key: &str, name: Option<&str>) -> bool {
        match self {
            Self::Key(value) => value == key,
            Self::Name(value) => Some(value.as_str()) == name,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Address of a DICOM entity, from the whole archive down to one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Root(PathBuf),
    Patient {
        root: PathBuf,
        label: Label,
    },
    Study {
        root: PathBuf,
        patient: Label,
        label: Label,
    },
    Series {
        root: PathBuf,
        patient: Label,
        study: Label,
        label: Label,
    },
}

impl Entity {
    pub fn root(path: impl AsRef<Path>) -> Self {
        Self::Root(path.as_ref().to_path_buf())
    }

    /// Number of address elements: 1 for the root, 4 for a series.
    pub fn depth(&self) -> usize {
        match self {
            Self::Root(_) => 1,
            Self::Patient { .. } => 2,
            Self::Study { .. } => 3,
            Self::Series { .. } => 4,
        }
    }

    pub fn root_path(&self) -> &Path {
        match self {
            Self::Root(root)
            | Self::Patient { root, .. }
            | Self::Study { root, .. }
            | Self::Series { root, .. } => root,
        }
    }

    /// The entity's own label, if it has one.
    pub fn label(&self) -> Option<&Label> {
        match self {
            Self::Root(_) => None,
            Self::Patient { label, .. }
            | Self::Study { label, .. }
            | Self::Series { label, .. } => Some(label),
        }
    }

    /// The address one level up.
    pub fn parent(&self) -> Option<Entity> {
        match self {
            Self::Root(_) => None,
            Self::Patient { root, .. } => Some(Self::Root(root.clone())),
            Self::Study { root, patient, .. } => Some(Self::Patient {
                root: root.clone(),
                label: patient.clone(),
            }),
            Self::Series {
                root,
                patient,
                study,
                ..
            } => Some(Self::Study {
                root: root.clone(),
                patient: patient.clone(),
                label: study.clone(),
            }),
        }
    }

    /// The address one level down, labelled with `label`.
    ///
    /// # Panics
    ///
    /// Panics when called on a series address, which has no child level.
    pub fn child(&self, label: Label) -> Entity {
        match self {
            Self::Root(root) => Self::Patient {
                root: root.clone(),
                label,
            },
            Self::Patient {
                root,
                label: patient,
            } => Self::Study {
                root: root.clone(),
                patient: patient.clone(),
                label,
            },
            Self::Study {
                root,
                patient,
                label: study,
            } => Self::Series {
                root: root.clone(),
                patient: patient.clone(),
                study: study.clone(),
                label,
            },
            Self::Series { .. } => panic!("a series address has no child level"),
        }
    }

    /// The same address with its own label replaced.
    pub fn with_label(&self, label: Label) -> Entity {
        match self.parent() {
            Some(parent) => parent.child(label),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(root) => write!(f, "{}", root.display()),
            Self::Patient { root, label } => write!(f, "{}/{label}", root.display()),
            Self::Study {
                root,
                patient,
                label,
            } => write!(f, "{}/{patient}/{label}", root.display()),
            Self::Series {
                root,
                patient,
                study,
                label,
            } => write!(f, "{}/{patient}/{study}/{label}", root.display()),
        }
    }
}

/// Query filter over a level's descriptive attribute. All given criteria
/// must pass.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    name: Option<String>,
    contains: Option<String>,
    among: Option<Vec<String>>,
}

impl Selector {
    /// A selector that admits everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Exact match on the attribute value.
    pub fn name(value: impl Into<String>) -> Self {
        Self {
            name: Some(value.into()),
            ..Self::default()
        }
    }

    /// Substring match on the attribute value.
    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            contains: Some(value.into()),
            ..Self::default()
        }
    }

    /// Membership of the attribute value in a set.
    pub fn among<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            among: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn admits(&self, value: Option<&str>) -> bool {
        if self.name.is_none() && self.contains.is_none() && self.among.is_none() {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        if let Some(name) = &self.name
            && value != name
        {
            return false;
        }
        if let Some(fragment) = &self.contains
            && !value.contains(fragment.as_str())
        {
            return false;
        }
        if let Some(set) = &self.among
            && !set.iter().any(|candidate| candidate == value)
        {
            return false;
        }
        true
    }
}
