//! Selective export tests

use chrono::DateTime;
use neurodata_sdk::{
    AccessMode, ColumnarTable, ContainerIo, FieldValue, IoConfig, LinkTarget,
    MemoryContainerBackend, MemoryStore, ObjectGraph, ObjectId, RaggedArray, Scalar, SessionError,
    core_catalog, core_type, export_file,
};
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn text(value: &str) -> FieldValue {
    FieldValue::Scalar(Scalar::Text(value.to_string()))
}

struct Source {
    device: ObjectId,
    shank: ObjectId,
    events: ObjectId,
}

/// Session with an events table and a probe linked from an electrode group
fn source_graph() -> (ObjectGraph, Source) {
    let mut graph = ObjectGraph::new(Arc::new(core_catalog()), &core_type("NWBFile")).unwrap();
    let root = graph.root();
    let start = DateTime::parse_from_rfc3339("2024-03-01T09:30:00+00:00").unwrap();
    graph.set_field(root, "session_description", text("export")).unwrap();
    graph.set_field(root, "identifier", text("ex-0001")).unwrap();
    graph
        .set_field(root, "session_start_time", FieldValue::Scalar(Scalar::DateTime(start)))
        .unwrap();

    let events = ColumnarTable::create(&mut graph, root, "events", "behavioral events", 3).unwrap();
    events
        .add_ragged_column(
            &mut graph,
            "times",
            "event times per trial",
            RaggedArray::from_f64_rows(vec![vec![1.0, 2.0], vec![], vec![3.0, 4.0, 5.0]]).unwrap(),
        )
        .unwrap();

    let device = graph.create_instance(&core_type("Device"), "probe", Some(root)).unwrap();
    let shank = graph
        .create_instance(&core_type("ElectrodeGroup"), "shank0", Some(root))
        .unwrap();
    graph.set_field(shank, "description", text("first shank")).unwrap();
    graph.set_field(shank, "location", text("CA1")).unwrap();
    graph
        .set_field(shank, "device", FieldValue::Link(LinkTarget::Local(device)))
        .unwrap();

    (
        graph,
        Source {
            device,
            shank,
            events: events.id,
        },
    )
}

fn session(store: &MemoryStore) -> ContainerIo<MemoryContainerBackend> {
    ContainerIo::new(store.backend(), Arc::new(core_catalog()), IoConfig::default())
}

/// Write the source graph to `a.nwb` and open it read-only
fn written_source(store: &MemoryStore) -> (ContainerIo<MemoryContainerBackend>, Source) {
    let (mut graph, ids) = source_graph();
    let mut io = session(store);
    block_on(io.create("a.nwb")).unwrap();
    block_on(io.write(&mut graph)).unwrap();
    block_on(io.close()).unwrap();
    block_on(io.open("a.nwb", AccessMode::ReadOnly)).unwrap();
    (io, ids)
}

fn read(store: &MemoryStore, location: &str) -> ObjectGraph {
    let mut io = session(store);
    block_on(io.open(location, AccessMode::ReadOnly)).unwrap();
    let graph = block_on(io.read()).unwrap();
    block_on(io.close()).unwrap();
    graph
}

mod export_tests {
    use super::*;

    #[test]
    fn test_removed_table_is_omitted() {
        let store = MemoryStore::new();
        let (mut io, ids) = written_source(&store);
        let before = store.snapshot("a.nwb").unwrap();

        let mut graph = block_on(io.read()).unwrap();
        let events = ColumnarTable::wrap(&graph, ids.events).unwrap();
        assert_eq!(events.ragged_row(&graph, "times", 1).unwrap().len(), 0);
        assert_eq!(events.ragged_row(&graph, "times", 2).unwrap().len(), 3);

        let report = graph.remove_instance("/events").unwrap();
        assert!(report.removed.contains(&ids.events));
        assert!(report.dangling.is_empty());

        let mut dest = store.backend();
        let exported = block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();
        assert!(exported.omitted.contains(&"/events".to_string()));
        assert!(exported.omitted.contains(&"/events/times".to_string()));
        assert_eq!(exported.remapped, vec!["/".to_string()]);
        assert!(exported.copied.contains(&"/probe".to_string()));
        assert!(exported.copied.contains(&"/shank0".to_string()));

        let b = read(&store, "b.nwb");
        assert!(b.resolve_path("/events").is_err());
        assert!(b.get(ids.events).is_none());
        assert_eq!(b.resolve_path("/probe").unwrap(), ids.device);

        // the source container is never touched by an export
        assert_eq!(store.snapshot("a.nwb").unwrap(), before);
        let a = read(&store, "a.nwb");
        assert_eq!(a.resolve_path("/events").unwrap(), ids.events);
    }

    #[test]
    fn test_copied_links_resolve_to_same_identity() {
        let store = MemoryStore::new();
        let (mut io, ids) = written_source(&store);
        let graph = block_on(io.read()).unwrap();

        let mut dest = store.backend();
        block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();

        let b = read(&store, "b.nwb");
        assert_eq!(
            b.get_field(ids.shank, "device"),
            Some(FieldValue::Link(LinkTarget::Local(ids.device)))
        );
        let times = ColumnarTable::wrap(&b, ids.events)
            .unwrap()
            .ragged_row(&b, "times", 2)
            .unwrap();
        assert_eq!(times.as_f64().unwrap(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_modified_instances_are_remapped() {
        let store = MemoryStore::new();
        let (mut io, ids) = written_source(&store);
        let mut graph = block_on(io.read()).unwrap();
        graph.clear_field(ids.shank, "location").unwrap();
        graph.set_field(ids.shank, "location", text("CA3")).unwrap();

        let mut dest = store.backend();
        let report = block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();
        assert!(report.remapped.contains(&"/shank0".to_string()));
        assert!(report.copied.contains(&"/probe".to_string()));
        assert!(!report.copied.contains(&"/shank0".to_string()));

        let b = read(&store, "b.nwb");
        let shank = b.instance(ids.shank).unwrap();
        assert_eq!(shank.field("location"), Some(&text("CA3")));
        assert_eq!(
            shank.field("device"),
            Some(&FieldValue::Link(LinkTarget::Local(ids.device)))
        );
    }

    #[test]
    fn test_dangling_link_blocks_export() {
        let store = MemoryStore::new();
        let (mut io, ids) = written_source(&store);
        let mut graph = block_on(io.read()).unwrap();

        let report = graph.remove_instance("/probe").unwrap();
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].source, ids.shank);
        assert_eq!(report.dangling[0].field, "device");

        let mut dest = store.backend();
        let err = block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap_err();
        match err {
            SessionError::DanglingLinks(links) => {
                assert_eq!(links.len(), 1);
                assert_eq!(links[0].source_path, "/shank0");
            }
            other => panic!("expected dangling links, got {:?}", other),
        }
        assert!(!store.contains("b.nwb"));

        let root = graph.root();
        let replacement = graph
            .create_instance(&core_type("Device"), "probe_v2", Some(root))
            .unwrap();
        graph.clear_field(ids.shank, "device").unwrap();
        graph
            .set_field(ids.shank, "device", FieldValue::Link(LinkTarget::Local(replacement)))
            .unwrap();
        block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();

        let b = read(&store, "b.nwb");
        assert_eq!(
            b.get_field(ids.shank, "device"),
            Some(FieldValue::Link(LinkTarget::Local(replacement)))
        );
        assert!(b.resolve_path("/probe").is_err());
    }

    #[test]
    fn test_repeated_export_is_stable() {
        let store = MemoryStore::new();
        let (mut io, _) = written_source(&store);
        let graph = block_on(io.read()).unwrap();
        let mut dest = store.backend();
        block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();
        block_on(io.close()).unwrap();

        let mut io = session(&store);
        block_on(io.open("b.nwb", AccessMode::ReadOnly)).unwrap();
        let b = block_on(io.read()).unwrap();
        block_on(io.export(&b, &mut dest, "c.nwb")).unwrap();

        assert_eq!(store.snapshot("b.nwb"), store.snapshot("c.nwb"));
        assert_eq!(read(&store, "c.nwb").structure(), graph.structure());
    }

    #[test]
    fn test_failed_export_leaves_no_container() {
        let store = MemoryStore::new();
        let (mut io, _) = written_source(&store);
        let before = store.snapshot("a.nwb").unwrap();
        let graph = block_on(io.read()).unwrap();

        let mut dest = store.backend();
        dest.fail_writes_after(3);
        assert!(block_on(io.export(&graph, &mut dest, "b.nwb")).is_err());
        assert!(!store.contains("b.nwb"));
        assert_eq!(store.snapshot("a.nwb").unwrap(), before);

        // the session stays usable after a failed export
        dest.clear_faults();
        block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap();
        assert!(store.contains("b.nwb"));
    }

    #[test]
    fn test_export_onto_source_is_refused() {
        let store = MemoryStore::new();
        let (mut io, _) = written_source(&store);
        let graph = block_on(io.read()).unwrap();
        let mut dest = store.backend();
        let err = block_on(io.export(&graph, &mut dest, "a.nwb")).unwrap_err();
        assert!(matches!(err, SessionError::ExportToSource(_)));
        assert_eq!(io.state().to_string(), "open read-only");
    }

    #[test]
    fn test_export_requires_open_session() {
        let store = MemoryStore::new();
        let (graph, _) = source_graph();
        let mut io = session(&store);
        let mut dest = store.backend();
        let err = block_on(io.export(&graph, &mut dest, "b.nwb")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[test]
    fn test_export_file() {
        let store = MemoryStore::new();
        let (mut io, _) = written_source(&store);
        block_on(io.close()).unwrap();

        let mut dest = store.backend();
        let report = block_on(export_file(
            store.backend(),
            &mut dest,
            "a.nwb",
            "copy.nwb",
            Arc::new(core_catalog()),
            &IoConfig::default(),
        ))
        .unwrap();
        assert!(report.omitted.is_empty());
        assert_eq!(read(&store, "copy.nwb").structure(), read(&store, "a.nwb").structure());

        let missing = block_on(export_file(
            store.backend(),
            &mut dest,
            "missing.nwb",
            "other.nwb",
            Arc::new(core_catalog()),
            &IoConfig::default(),
        ));
        assert!(missing.is_err());
        assert!(!store.contains("other.nwb"));
    }
}
