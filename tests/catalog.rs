//! End-to-end catalog lifecycle tests over temporary folders.

use std::collections::HashSet;
use std::path::Path;

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use ndarray::Array2;
use tempfile::TempDir;

use dicom_archive::{Catalog, Entity, Label, Selector, Slice, Volume, dataset};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn plane(fill: u16) -> Array2<u16> {
    Array2::from_elem((4, 4), fill)
}

fn volume_of(fills: &[u16]) -> Volume {
    let slices: Vec<Slice> = fills
        .iter()
        .enumerate()
        .map(|(index, &fill)| Slice::new(plane(fill), index as f64 * 2.0))
        .collect();
    Volume::stack(&slices, (1.0, 1.0, 2.0)).unwrap()
}

fn series_at(root: &Path, patient: &str, study: &str, series: &str) -> Entity {
    Entity::root(root)
        .child(Label::name(patient))
        .child(Label::name(study))
        .child(Label::name(series))
}

fn visible_records(catalog: &Catalog) -> Vec<dicom_archive::CatalogRecord> {
    catalog
        .index(&catalog.root_entity())
        .iter()
        .filter_map(|key| catalog.record(key).cloned())
        .collect()
}

/// Write a bare instance file directly into the folder, bypassing the
/// catalog, the way third-party tooling would drop files there.
fn put_fixture_instance(
    root: &Path,
    name: &str,
    ids: (&str, &str, &str),
    location: f64,
    echo_time: Option<f64>,
    fill: u16,
) {
    let mut object = dataset::template();
    dataset::apply_slice(
        &mut object,
        &Slice::new(Array2::from_elem((2, 2), fill), location),
        (1.0, 1.0, 1.0),
        false,
    );
    let (patient, study, series) = ids;
    object.put(DataElement::new(
        tags::PATIENT_ID,
        VR::LO,
        PrimitiveValue::from(patient),
    ));
    object.put(DataElement::new(
        tags::STUDY_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(study),
    ));
    object.put(DataElement::new(
        tags::SERIES_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(series),
    ));
    object.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(dataset::new_uid().as_str()),
    ));
    if let Some(echo) = echo_time {
        object.put(DataElement::new(
            tags::ECHO_TIME,
            VR::DS,
            PrimitiveValue::from(echo.to_string().as_str()),
        ));
    }
    dataset::write_dataset(&object, &root.join(name)).unwrap();
}

#[test]
fn write_commit_and_reopen_round_trips() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let series = series_at(&root, "Doe^Jane", "baseline", "t1w");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[100, 200]), &series, None, false)
        .unwrap();
    assert_eq!(catalog.patients(&Selector::any()).len(), 1);
    assert_eq!(catalog.files(&series).len(), 2);
    catalog.close().unwrap();
    assert!(root.join("archive.json").exists());

    let catalog = dicom_archive::open(&root).unwrap();
    assert_eq!(catalog.index(&catalog.root_entity()).len(), 2);
    for record in visible_records(&catalog) {
        assert_eq!(record.status, dicom_archive::RecordStatus::Clean);
        assert_eq!(record.patient_name.as_deref(), Some("Doe^Jane"));
    }

    let volume = catalog.volume(&series, &[], false).unwrap();
    assert_eq!(volume.shape(), &[2, 4, 4]);
    assert_eq!(volume.positions(), &[0.0, 2.0]);
    assert_eq!(volume.data()[[0, 0, 0]], 100);
    assert_eq!(volume.data()[[1, 0, 0]], 200);
    assert_eq!(volume.spacing(), (1.0, 1.0, 2.0));
}

#[test]
fn rollback_deletes_created_files() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let series = series_at(&root, "Doe^Jane", "baseline", "t1w");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[1, 2, 3]), &series, None, false)
        .unwrap();
    let files = catalog.files(&series);
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|file| file.exists()));

    catalog.restore().unwrap();
    assert!(files.iter().all(|file| !file.exists()));
    assert!(catalog.index(&catalog.root_entity()).is_empty());

    let catalog = dicom_archive::open(&root).unwrap();
    assert!(catalog.index(&catalog.root_entity()).is_empty());
}

#[test]
fn staged_deletion_hits_disk_on_commit_only() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let series = series_at(&root, "Doe^Jane", "baseline", "t1w");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[1, 2]), &series, None, false)
        .unwrap();
    catalog.close().unwrap();
    let files = catalog.files(&series);

    catalog.delete(&series);
    assert!(catalog.files(&series).is_empty());
    assert!(files.iter().all(|file| file.exists()));

    catalog.close().unwrap();
    assert!(files.iter().all(|file| !file.exists()));
    assert!(dicom_archive::open(&root)
        .unwrap()
        .index(&Entity::root(&root))
        .is_empty());
}

#[test]
fn patient_copy_fans_out_and_reidentifies() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");

    let mut catalog = dicom_archive::open(&root).unwrap();
    for (study, series) in [("visit 1", "t1w"), ("visit 2", "t2w")] {
        catalog
            .write_volume(
                &volume_of(&[1, 2, 3]),
                &series_at(&root, "patient a", study, series),
                None,
                false,
            )
            .unwrap();
    }
    catalog.close().unwrap();
    let original_sops: HashSet<String> = visible_records(&catalog)
        .into_iter()
        .map(|record| record.sop_uid)
        .collect();

    let from = Entity::root(&root).child(Label::name("patient a"));
    let to = Entity::root(&root).child(Label::name("patient b"));
    catalog.copy(&from, &to).unwrap();

    assert_eq!(catalog.patients(&Selector::any()).len(), 2);
    assert_eq!(catalog.studies(&to, &Selector::any()).unwrap().len(), 2);
    let copied_series = catalog.series(&to, &Selector::any()).unwrap();
    assert_eq!(copied_series.len(), 2);
    assert_eq!(catalog.files(&to).len(), 6);

    for series in &copied_series {
        let mut numbers: Vec<i32> = catalog
            .index(series)
            .iter()
            .filter_map(|key| catalog.record(key).and_then(|record| record.instance_number))
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
    for key in catalog.index(&to) {
        let record = catalog.record(&key).unwrap();
        assert!(!original_sops.contains(&record.sop_uid));
    }

    // every live (series, instance) pair stays unique
    let mut pairs = HashSet::new();
    for record in visible_records(&catalog) {
        assert!(pairs.insert((record.series_uid.clone(), record.instance_number)));
    }
}

#[test]
fn copy_to_a_different_depth_mutates_nothing() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let series = series_at(&root, "Doe^Jane", "baseline", "t1w");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[1, 2]), &series, None, false)
        .unwrap();
    catalog.close().unwrap();

    let patient = Entity::root(&root).child(Label::name("someone else"));
    let err = catalog.copy(&series, &patient).unwrap_err();
    assert!(matches!(err, dicom_archive::Error::ShapeMismatch { .. }));
    assert_eq!(catalog.index(&catalog.root_entity()).len(), 2);
    assert_eq!(catalog.patients(&Selector::any()).len(), 1);
}

#[test]
fn mixed_sop_classes_split_into_sibling_series_on_rebuild() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let series = series_at(&root, "Doe^Jane", "baseline", "mixed");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[1, 2]), &series, None, false)
        .unwrap();
    catalog.close().unwrap();
    let files = catalog.files(&series);

    // retag the second instance as a different SOP class
    let mut object = dicom::object::open_file(&files[1]).unwrap();
    object.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(dicom_dictionary_std::uids::CT_IMAGE_STORAGE),
    ));
    object.write_to_file(&files[1]).unwrap();

    std::fs::remove_file(root.join("archive.json")).unwrap();
    let catalog = dicom_archive::open(&root).unwrap();

    let all_series = catalog
        .series(&catalog.root_entity(), &Selector::any())
        .unwrap();
    assert_eq!(all_series.len(), 2);
    let descriptions: HashSet<Option<String>> = visible_records(&catalog)
        .into_iter()
        .map(|record| record.series_description)
        .collect();
    assert!(descriptions.contains(&Some("mixed".to_string())));
    assert!(descriptions.contains(&Some("mixed [1]".to_string())));

    for series in &all_series {
        let unique = catalog.unique(&["SOPClassUID"], series).unwrap();
        assert_eq!(unique[0].1.len(), 1, "series {series} is not homogeneous");
    }
}

#[test]
fn multiframe_files_split_into_single_frames_on_rebuild() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    std::fs::create_dir_all(&root).unwrap();

    let mut object = dataset::template();
    dataset::apply_slice(
        &mut object,
        &Slice::new(Array2::from_elem((2, 2), 5u16), 0.0),
        (1.0, 1.0, 1.0),
        false,
    );
    object.put(DataElement::new(
        tags::NUMBER_OF_FRAMES,
        VR::IS,
        PrimitiveValue::from("3"),
    ));
    let frames: Vec<u16> = (0..12).collect();
    object.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(frames.into()),
    ));
    object.put(DataElement::new(
        tags::SERIES_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from("1.2.3.4"),
    ));
    object.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(dataset::new_uid().as_str()),
    ));
    dataset::write_dataset(&object, &root.join("multi.dcm")).unwrap();

    let catalog = dicom_archive::open(&root).unwrap();
    assert!(catalog.diagnostics().is_empty());
    assert_eq!(catalog.index(&catalog.root_entity()).len(), 3);
    assert!(!root.join("multi.dcm").exists());
    let numbers: HashSet<Option<i32>> = visible_records(&catalog)
        .into_iter()
        .map(|record| record.instance_number)
        .collect();
    assert_eq!(numbers, HashSet::from([Some(1), Some(2), Some(3)]));
}

#[test]
fn failed_multiframe_conversion_is_reported_not_swallowed() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    std::fs::create_dir_all(&root).unwrap();

    // a multiframe record with no pixel payload cannot be converted
    let mut object = InMemDicomObject::new_empty();
    object.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(dicom_dictionary_std::uids::MR_IMAGE_STORAGE),
    ));
    object.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(dataset::new_uid().as_str()),
    ));
    object.put(DataElement::new(
        tags::NUMBER_OF_FRAMES,
        VR::IS,
        PrimitiveValue::from("3"),
    ));
    dataset::write_dataset(&object, &root.join("broken.dcm")).unwrap();

    let catalog = dicom_archive::open(&root).unwrap();
    assert_eq!(catalog.diagnostics().len(), 1);
    assert!(catalog.diagnostics()[0].file.ends_with("broken.dcm"));
    assert!(catalog.index(&catalog.root_entity()).is_empty());
    assert!(root.join("broken.dcm").exists());
}

#[test]
fn move_stages_source_deletion_and_restore_recovers_it() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    let source = series_at(&root, "Doe^Jane", "baseline", "t1w");
    let target = series_at(&root, "Doe^Jane", "baseline", "t1w repeat");

    let mut catalog = dicom_archive::open(&root).unwrap();
    catalog
        .write_volume(&volume_of(&[1, 2]), &source, None, false)
        .unwrap();
    catalog.close().unwrap();

    catalog.move_entity(&source, &target).unwrap();
    assert!(catalog.files(&source).is_empty());
    assert_eq!(catalog.files(&target).len(), 2);

    catalog.restore().unwrap();
    let recovered = catalog.files(&source);
    assert_eq!(recovered.len(), 2);
    assert!(recovered.iter().all(|file| file.exists()));
    assert!(catalog.files(&target).is_empty());
}

#[test]
fn four_dimensional_volume_reads_and_writes_with_coordinates() {
    init_logs();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("archive");
    std::fs::create_dir_all(&root).unwrap();

    let ids = ("p1", "1.2.3.1", "1.2.3.2");
    put_fixture_instance(&root, "a.dcm", ids, 0.0, Some(10.0), 1);
    put_fixture_instance(&root, "b.dcm", ids, 2.0, Some(10.0), 2);
    put_fixture_instance(&root, "c.dcm", ids, 0.0, Some(20.0), 3);
    put_fixture_instance(&root, "d.dcm", ids, 2.0, Some(20.0), 4);

    let mut catalog = dicom_archive::open(&root).unwrap();
    let series = Entity::root(&root)
        .child(Label::key("p1"))
        .child(Label::key("1.2.3.1"))
        .child(Label::key("1.2.3.2"));
    let volume = catalog.volume(&series, &["EchoTime"], false).unwrap();
    assert_eq!(volume.shape(), &[2, 2, 2, 2]);
    assert_eq!(volume.axes(), &[("EchoTime".to_string(), vec![10.0, 20.0])]);
    assert_eq!(volume.data()[[0, 0, 0, 0]], 1);
    assert_eq!(volume.data()[[0, 1, 0, 0]], 2);
    assert_eq!(volume.data()[[1, 0, 0, 0]], 3);
    assert_eq!(volume.data()[[1, 1, 0, 0]], 4);

    let target = series_at(&root, "Doe^Jane", "baseline", "multi echo");
    catalog.write_volume(&volume, &target, None, false).unwrap();
    let mut numbers: Vec<i32> = catalog
        .index(&target)
        .iter()
        .filter_map(|key| catalog.record(key).and_then(|record| record.instance_number))
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    let echoes = catalog.unique(&["EchoTime"], &target).unwrap();
    assert_eq!(echoes[0].1, vec!["10".to_string(), "20".to_string()]);
}
