//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use blendlink::prelude::*;
use blendlink::testutil::{DocWriter, Layout};

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("Failed to write test document");
    path
}

pub fn writer() -> DocWriter {
    let mut w = DocWriter::current(Layout::native());
    w.glob(0);
    w
}

/// Library with a camera, a lamp and an object using the camera.
pub fn camera_library() -> Vec<u8> {
    let mut w = writer();
    let cam = w.camera(0x1000, "Cam", 50.0);
    w.lamp(0x2000, "Sun", 3.0);
    w.object(0x3000, "CamOb", cam);
    w.finish()
}

pub fn warnings(r: &LoadResult) -> Vec<String> {
    r.reports
        .iter()
        .filter(|rep| rep.severity == Severity::Warning)
        .map(|rep| rep.message.clone())
        .collect()
}

/// First record of a type and name in any namespace.
pub fn record_id(r: &LoadResult, code: IdCode, name: &str) -> RecordId {
    r.graph
        .iter()
        .find(|(_, rec)| rec.code() == code && rec.name() == name)
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no {}{}", code, name))
}

pub fn record<'a>(r: &'a LoadResult, code: IdCode, name: &str) -> &'a Record {
    let id = record_id(r, code, name);
    r.graph.record(id).expect("record handle is live")
}
