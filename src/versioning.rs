//! Version upgrade pass.
//!
//! Rules belong to record types (see [`IdType::rules`](crate::types::IdType))
//! and are keyed by the (major, minor) version a record's document was
//! written with. A rule applies to records read during the current load
//! whose version is below its threshold.
//!
//! Pre-link rules run per namespace before cross references are resolved.
//! Post-link rules run once over the joined graph.

use crate::graph::{FileVersion, Graph, Record, RecordId, Tags};
use crate::types::Registry;

/// When a rule runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    PreLink,
    PostLink,
}

/// One data migration.
#[derive(Clone, Copy, Debug)]
pub struct VersionRule {
    pub description: &'static str,
    pub phase: Phase,
    /// Applies to documents older than this.
    pub before: FileVersion,
    pub apply: fn(RecordId, &mut Record),
}

impl VersionRule {
    #[inline]
    pub fn applies(&self, phase: Phase, version: FileVersion) -> bool {
        self.phase == phase && version < self.before
    }
}

fn upgrade_record(graph: &mut Graph, registry: &Registry, id: RecordId, version: FileVersion, phase: Phase) -> usize {
    let Some(record) = graph.record_mut(id) else { return 0 };
    if !record.id.tag.contains(Tags::NEW) {
        return 0;
    }
    let Some(t) = registry.get(record.id.code) else { return 0 };
    let mut applied = 0;
    for rule in t.rules.iter().filter(|r| r.applies(phase, version)) {
        tracing::trace!("{}{}: {}", record.id.code, record.id.name, rule.description);
        (rule.apply)(id, record);
        applied += 1;
    }
    applied
}

/// Run the rules of one phase over a namespace at the namespace's version.
pub fn upgrade_namespace(graph: &mut Graph, registry: &Registry, ns: usize, phase: Phase) -> usize {
    let version = graph.namespace(ns).version();
    let ids: Vec<RecordId> = graph.namespace(ns).iter().collect();
    let applied = ids
        .into_iter()
        .map(|id| upgrade_record(graph, registry, id, version, phase))
        .sum();
    tracing::debug!("versioning {:?} namespace {} ({}): {} rules applied", phase, ns, version, applied);
    applied
}

/// Run the rules of one phase over every record, each at the version of
/// the document it came from.
pub fn upgrade_all(graph: &mut Graph, registry: &Registry, phase: Phase) -> usize {
    let ids: Vec<(RecordId, Option<RecordId>)> = graph.iter().map(|(id, r)| (id, r.id.lib)).collect();
    let applied = ids
        .into_iter()
        .map(|(id, lib)| {
            let version = graph.version_of(lib);
            upgrade_record(graph, registry, id, version, phase)
        })
        .sum();
    tracing::debug!("versioning {:?}: {} rules applied", phase, applied);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::IdCode;
    use crate::sdna::{Ptr, Schema, StructValue};

    fn record(code: IdCode, name: &str, struct_name: &str) -> Record {
        let schema = Schema::current().unwrap();
        let mut data = StructValue::zeroed(&schema, schema.struct_index(struct_name).unwrap());
        data.remove("id");
        let mut r = Record::new(code, name, data);
        r.id.tag = Tags::NEW;
        r
    }

    fn snapshot(g: &Graph) -> Vec<Record> {
        g.iter().map(|(_, r)| r.clone()).collect()
    }

    #[test]
    fn test_prelink_rules_respect_version() {
        let registry = Registry::builtin();
        let mut old = Graph::new(FileVersion::new(240, 0));
        let cam = old.add_record(0, record(IdCode::CA, "Cam", "Camera"));
        assert!(upgrade_namespace(&mut old, &registry, 0, Phase::PreLink) > 0);
        let c = &old.record(cam).unwrap().data;
        assert_eq!(c.float("sensor_x"), Some(36.0));
        assert_eq!(c.float("sensor_y"), Some(24.0));

        let mut new = Graph::new(FileVersion::new(279, 0));
        let cam = new.add_record(0, record(IdCode::CA, "Cam", "Camera"));
        upgrade_namespace(&mut new, &registry, 0, Phase::PreLink);
        assert_eq!(new.record(cam).unwrap().data.float("sensor_x"), Some(0.0));
    }

    #[test]
    fn test_only_new_records() {
        let registry = Registry::builtin();
        let mut g = Graph::new(FileVersion::new(240, 0));
        let mut r = record(IdCode::OB, "Ob", "Object");
        r.id.tag = Tags::LOCAL;
        let ob = g.add_record(0, r);
        assert_eq!(upgrade_namespace(&mut g, &registry, 0, Phase::PreLink), 0);
        assert_eq!(g.record(ob).unwrap().data.float("empty_drawsize"), Some(0.0));
    }

    #[test]
    fn test_upgrade_twice_is_same_as_once() {
        let registry = Registry::builtin();
        let mut g = Graph::new(FileVersion::new(240, 0));
        g.add_record(0, record(IdCode::CA, "Cam", "Camera"));
        g.add_record(0, record(IdCode::OB, "Ob", "Object"));
        g.add_record(0, record(IdCode::LA, "Lamp", "Lamp"));
        let mut me = record(IdCode::ME, "Mesh", "Mesh");
        me.data.set_int("totcol", -3);
        g.add_record(0, me);
        let sc = g.add_record(0, record(IdCode::SC, "Scene", "Scene"));
        g.record_mut(sc).unwrap().data.set_ptr("set", Ptr::Id(sc));

        upgrade_namespace(&mut g, &registry, 0, Phase::PreLink);
        upgrade_all(&mut g, &registry, Phase::PostLink);
        let once = snapshot(&g);
        upgrade_namespace(&mut g, &registry, 0, Phase::PreLink);
        upgrade_all(&mut g, &registry, Phase::PostLink);
        assert_eq!(snapshot(&g), once);
        assert_eq!(g.record(sc).unwrap().data.ptr("set"), Some(Ptr::Null));
    }
}
