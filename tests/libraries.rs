//! Integration tests for reading records out of library documents.

mod common;

use blendlink::prelude::*;
use blendlink::testutil::FieldValue;
use tempfile::TempDir;

use common::{camera_library, record, record_id, warnings, write, writer};

/// Primary document linking `full_name` from `//lib.blend`, used by an
/// object (cameras) or a scene base (objects).
fn primary_linking(full_name: &str) -> Vec<u8> {
    let mut w = writer();
    w.library(0x100, "lib.blend", "//lib.blend");
    let stub = w.id_stub(0x200, full_name);
    if full_name.starts_with("OB") {
        w.scene(0x400, "Scene", &[stub]);
    } else {
        w.object(0x300, "Ob", stub);
    }
    w.finish()
}

#[test]
fn test_linked_camera_from_relative_library() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let lib_path = write(dir.path(), "lib.blend", &camera_library());
    let main = write(dir.path(), "main.blend", &primary_linking("CACam"));

    let r = load_primary(&main).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);
    assert_eq!(r.graph.namespaces().len(), 2);

    let lib = r.graph.libraries()[0];
    assert_eq!(r.graph.namespace(1).library, Some(lib));
    let lib_rec = r.graph.record(lib).unwrap();
    assert_eq!(lib_rec.data.string("filepath").unwrap(), lib_path.to_string_lossy());
    assert_eq!(lib_rec.data.string("name").unwrap(), "//lib.blend");

    let cam = r.graph.find(IdCode::CA, "Cam", Some(lib)).expect("camera linked");
    let cam_rec = r.graph.record(cam).unwrap();
    assert_eq!(cam_rec.id.lib, Some(lib));
    assert_eq!(cam_rec.data.float("lens"), Some(50.0));
    assert_eq!(cam_rec.id.users, 1);
    assert!(cam_rec.tag().contains(Tags::EXTERN));
    assert!(!cam_rec.tag().intersects(Tags::STUB | Tags::NEED_LINK | Tags::NEW));

    let ob = record(&r, IdCode::OB, "Ob");
    assert_eq!(ob.id.lib, None);
    assert_eq!(ob.data.ptr("data"), Some(Ptr::Id(cam)));

    // Only what was asked for is read.
    assert!(r.graph.find(IdCode::LA, "Sun", Some(lib)).is_none());
    assert!(r.graph.find(IdCode::OB, "CamOb", Some(lib)).is_none());
    assert!(!r.has_placeholders());
}

#[test]
fn test_scene_camera_from_library() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(dir.path(), "lib.blend", &camera_library());

    let mut w = writer();
    w.library(0x100, "lib.blend", "//lib.blend");
    w.id_stub(0x200, "CACam");
    w.scene_with(0x400, "Main", &[], &[("camera", FieldValue::Ptr(0x200))]);
    let main = write(dir.path(), "main.blend", &w.finish());

    let r = load_primary(&main).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);
    assert_eq!(r.graph.namespaces().len(), 2);

    let lib = r.graph.libraries()[0];
    let cam = r.graph.find(IdCode::CA, "Cam", Some(lib)).unwrap();
    let sc = r.graph.find(IdCode::SC, "Main", None).unwrap();
    assert_eq!(r.graph.record(sc).unwrap().data.ptr("camera"), Some(Ptr::Id(cam)));
    // Scene cameras do not count as users.
    assert_eq!(r.graph.record(cam).unwrap().id.users, 0);
}

#[test]
fn test_indirect_records_are_expanded() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(dir.path(), "lib.blend", &camera_library());
    let main = write(dir.path(), "main.blend", &primary_linking("OBCamOb"));

    let r = load_primary(&main).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);

    let lib = r.graph.libraries()[0];
    let ob = r.graph.find(IdCode::OB, "CamOb", Some(lib)).unwrap();
    let cam = r.graph.find(IdCode::CA, "Cam", Some(lib)).unwrap();
    let ob_rec = r.graph.record(ob).unwrap();
    let cam_rec = r.graph.record(cam).unwrap();

    assert!(ob_rec.tag().contains(Tags::EXTERN));
    assert!(cam_rec.tag().contains(Tags::INDIRECT));
    assert_eq!(ob_rec.data.ptr("data"), Some(Ptr::Id(cam)));
    assert_eq!(ob_rec.id.users, 1);
    assert_eq!(cam_rec.id.users, 1);
    assert_eq!(r.graph.namespace(1).len(), 2);
}

#[test]
fn test_missing_library_gives_placeholders() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let main = write(dir.path(), "main.blend", &primary_linking("CACam"));
    let lib_path = dir.path().join("lib.blend");

    let r = load_primary(&main).expect("Failed to load");
    let warns = warnings(&r);
    assert!(warns.contains(&format!("Cannot find lib '{}'", lib_path.display())), "{:?}", warns);
    assert!(warns.iter().any(|w| w.starts_with("LIB: Camera: 'Cam' missing from")), "{:?}", warns);

    assert!(r.has_placeholders());
    let lib = r.graph.libraries()[0];
    assert!(r.graph.record(lib).unwrap().is_missing());
    let cam = r.graph.find(IdCode::CA, "Cam", Some(lib)).unwrap();
    assert!(r.graph.record(cam).unwrap().is_missing());
    assert_eq!(record(&r, IdCode::OB, "Ob").data.ptr("data"), Some(Ptr::Id(cam)));

    let opts = LoadOptions::new().with_placeholders(false);
    let r = load_primary_with(&main, &opts).expect("Failed to load");
    assert!(!r.has_placeholders());
    assert_eq!(record(&r, IdCode::OB, "Ob").data.ptr("data"), Some(Ptr::Null));
}

#[test]
fn test_nested_library_chain() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    let mut deep = writer();
    deep.camera(0x1000, "Cam", 24.0);
    write(dir.path(), "deep.blend", &deep.finish());

    let mut mid = writer();
    mid.library(0x100, "deep.blend", "//deep.blend");
    mid.id_stub(0x200, "CACam");
    mid.object(0x300, "Ob", 0x200);
    write(dir.path(), "mid.blend", &mid.finish());

    let mut main = writer();
    main.library(0x100, "mid.blend", "//mid.blend");
    main.id_stub(0x500, "OBOb");
    main.scene(0x600, "Scene", &[0x500]);
    let main = write(dir.path(), "main.blend", &main.finish());

    let r = load_primary(&main).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);
    assert_eq!(r.graph.namespaces().len(), 3);

    let ob = record_id(&r, IdCode::OB, "Ob");
    let cam = record_id(&r, IdCode::CA, "Cam");
    let mid_lib = r.graph.record(ob).unwrap().id.lib.unwrap();
    let deep_lib = r.graph.record(cam).unwrap().id.lib.unwrap();
    assert_ne!(mid_lib, deep_lib);

    let deep_rec = r.graph.record(deep_lib).unwrap();
    assert!(deep_rec.tag().contains(Tags::INDIRECT));
    assert_eq!(deep_rec.data.ptr("parent"), Some(Ptr::Id(mid_lib)));
    assert_eq!(deep_rec.data.string("name").unwrap(), "//deep.blend");

    assert_eq!(r.graph.record(ob).unwrap().data.ptr("data"), Some(Ptr::Id(cam)));
    assert!(r.graph.record(cam).unwrap().tag().contains(Tags::INDIRECT));
    assert_eq!(r.graph.record(cam).unwrap().data.float("lens"), Some(24.0));
}

#[test]
fn test_packed_library() {
    let mut w = writer();
    w.packed_library(0x100, "lib.blend", "//lib.blend", &camera_library());
    let stub = w.id_stub(0x200, "CACam");
    w.object(0x300, "Ob", stub);

    let r = load_from_bytes(w.finish(), &LoadOptions::default()).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);
    assert!(r
        .reports
        .iter()
        .any(|rep| rep.severity == Severity::Info && rep.message.starts_with("Read packed library")));

    let cam = record(&r, IdCode::CA, "Cam");
    assert_eq!(cam.data.float("lens"), Some(50.0));
    assert!(cam.id.lib.is_some());
}

#[test]
fn test_load_library_named_part() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let lib_path = write(dir.path(), "lib.blend", &camera_library());

    let part = load_library_named_part(&lib_path, IdCode::OB, "CamOb").expect("Failed to link");
    let ob = part.record.expect("object linked");
    let r = &part.result;
    assert!(warnings(r).is_empty(), "{:?}", r.reports);

    let ob_rec = r.graph.record(ob).unwrap();
    assert!(ob_rec.tag().contains(Tags::EXTERN));
    let cam = r.graph.find(IdCode::CA, "Cam", ob_rec.id.lib).unwrap();
    assert_eq!(ob_rec.data.ptr("data"), Some(Ptr::Id(cam)));
    assert!(r.graph.record(cam).unwrap().tag().contains(Tags::INDIRECT));
    assert!(r.graph.find(IdCode::LA, "Sun", ob_rec.id.lib).is_none());

    let part = load_library_named_part(&lib_path, IdCode::CA, "Nope").expect("Failed to link");
    assert!(part.record.is_none());
    assert_eq!(warnings(&part.result).len(), 1);
}

#[test]
fn test_link_into_loaded_graph_reuses_records() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let lib_path = write(dir.path(), "lib.blend", &camera_library());
    let main = write(dir.path(), "main.blend", &primary_linking("OBCamOb"));

    let r = load_primary(&main).expect("Failed to load");
    let before = r.graph.record_count();
    let cam = record_id(&r, IdCode::CA, "Cam");
    assert!(r.graph.record(cam).unwrap().tag().contains(Tags::INDIRECT));

    let mut link = LibraryLink::begin(r.graph, &lib_path, LoadOptions::default()).expect("Failed to open library");
    let linked = link.link_named_part(IdCode::CA, "Cam", LinkFlags::default());
    assert_eq!(linked, Some(cam));
    let sun = link.link_named_part(IdCode::LA, "Sun", LinkFlags::default()).expect("lamp linked");
    let r = link.end();

    assert_eq!(r.graph.record_count(), before + 1);
    let cam_rec = r.graph.record(cam).unwrap();
    assert!(cam_rec.tag().contains(Tags::EXTERN));
    assert!(!cam_rec.tag().contains(Tags::INDIRECT));
    assert_eq!(r.graph.record(sun).unwrap().data.float("energy"), Some(3.0));
    assert_eq!(r.graph.namespaces().len(), 2);
}

#[test]
fn test_non_linkable_type_is_refused() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let lib_path = write(dir.path(), "lib.blend", &camera_library());

    let mut link = LibraryLink::begin(Graph::default(), &lib_path, LoadOptions::default()).expect("Failed to open library");
    assert!(link.link_named_part(IdCode::LI, "lib.blend", LinkFlags::default()).is_none());
    let r = link.end();
    assert_eq!(r.reports.count(Severity::Error), 1);
}

#[test]
fn test_load_library_path() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let lib_path = write(dir.path(), "lib.blend", &camera_library());

    let part = load_library_path(lib_path.join("Object").join("CamOb")).expect("Failed to link");
    let r = &part.result;
    let ob = r.graph.record(part.record.expect("object linked")).unwrap();
    assert_eq!(ob.name(), "CamOb");
    assert!(ob.tag().contains(Tags::EXTERN));

    // Codes work as groups too.
    let part = load_library_path(lib_path.join("CA").join("Cam")).expect("Failed to link");
    assert!(part.record.is_some());

    assert!(load_library_path(lib_path.join("Camera")).is_err());
    assert!(load_library_path(lib_path.join("Nothing").join("Cam")).is_err());
    assert!(load_library_path(dir.path().join("other.blend/Object/CamOb")).is_err());
}

#[test]
fn test_link_copy_buffer() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut w = writer();
    let cam = w.camera(0x1000, "Cam", 50.0);
    w.lamp(0x2000, "Sun", 3.0);
    let ob = w.object(0x3000, "CamOb", cam);
    w.object(0x4000, "Other", cam);
    w.group(0x5000, "Grp", &[ob]);
    let lib_path = write(dir.path(), "lib.blend", &w.finish());

    let mut link = LibraryLink::begin(Graph::default(), &lib_path, LoadOptions::default()).expect("Failed to open library");
    let read = link.link_copy_buffer();
    assert_eq!(read.len(), 3);
    // Already read: nothing new.
    assert!(link.link_copy_buffer().is_empty());
    let r = link.end();
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);

    let mut names: Vec<String> = read.iter().map(|&id| r.graph.record(id).unwrap().id.full_name()).collect();
    names.sort();
    assert_eq!(names, ["GRGrp", "OBCamOb", "OBOther"]);
    for &id in &read {
        assert!(r.graph.record(id).unwrap().tag().contains(Tags::INDIRECT));
    }

    let lib = r.graph.libraries()[0];
    let cam = r.graph.find(IdCode::CA, "Cam", Some(lib)).expect("camera expanded");
    assert_eq!(r.graph.record(cam).unwrap().id.users, 2);
    assert!(r.graph.find(IdCode::LA, "Sun", Some(lib)).is_none());
    assert_eq!(r.graph.namespace(1).len(), 4);
}

#[test]
fn test_library_namespace_takes_its_document_version() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut lib = blendlink::testutil::DocWriter::with_structs(
        blendlink::testutil::Layout::native(),
        240,
        blendlink::sdna::current::CURRENT_STRUCTS,
    );
    lib.glob(0);
    lib.camera(0x1000, "Cam", 50.0);
    write(dir.path(), "lib.blend", &lib.finish());
    let main = write(dir.path(), "main.blend", &primary_linking("CACam"));

    let r = load_primary(&main).expect("Failed to load");
    assert!(warnings(&r).is_empty(), "{:?}", r.reports);
    assert_eq!(r.graph.primary().version(), r.globals.as_ref().unwrap().version);
    let ns = r.graph.namespace(1);
    assert!(ns.is_settled());
    assert_eq!(ns.version(), FileVersion::new(240, 0));

    // Upgraded by the library's version, not the primary document's.
    let cam = record(&r, IdCode::CA, "Cam");
    assert_eq!(cam.data.float("sensor_x"), Some(36.0));

    // A library that never opens keeps the referencing document's version.
    let lonely = write(dir.path(), "lonely.blend", &primary_linking("CACam"));
    std::fs::remove_file(dir.path().join("lib.blend")).expect("Failed to remove library");
    let r = load_primary(&lonely).expect("Failed to load");
    let ns = r.graph.namespace(1);
    assert!(!ns.is_settled());
    assert_eq!(ns.version(), r.graph.primary().version());
}
