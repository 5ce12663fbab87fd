//! Render graph integration tests.
//!
//! Culling, versioning and resource lifetimes observed through the
//! recording driver.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rstest::rstest;

use common::{color_desc, init_logging};
use postfx_graph::backend::*;
use postfx_graph::render_graph::*;

/// One pass creating and writing a texture, optionally presented.
fn single_writer(presented: bool) -> (ResourceGraph, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut graph = ResourceGraph::new();
    let counter = Arc::clone(&runs);
    let output = graph.add_pass(
        "writer",
        |builder| {
            let t = builder.create_texture("color", color_desc(64, 64));
            let t = builder.write(t);
            let target = builder.create_render_target("color", RenderTargetDesc::new().with_color(t));
            (t, target)
        },
        move |data, resources, driver| {
            counter.fetch_add(1, Ordering::SeqCst);
            let out = resources.render_target(data.1);
            driver.begin_render_pass(out.target, &out.params);
            driver.end_render_pass();
            Ok(())
        },
    );
    if presented {
        graph.present(output.0);
    }
    (graph, runs)
}

// ============================================================================
// Culling
// ============================================================================

#[rstest]
#[case::presented(true, 1, 1)]
#[case::unreferenced(false, 0, 0)]
fn test_single_writer_scenarios(
    #[case] presented: bool,
    #[case] expected_runs: usize,
    #[case] expected_allocations: usize,
) {
    init_logging();
    let (graph, runs) = single_writer(presented);
    let compiled = graph.compile().unwrap();

    let mut driver = DummyDriver::new();
    compiled.execute(&mut driver).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), expected_runs);
    assert_eq!(driver.textures_created(), expected_allocations);
    assert_eq!(driver.render_targets_created(), expected_allocations);
    assert_eq!(driver.live_texture_count(), 0);
    assert_eq!(driver.live_render_target_count(), 0);
}

#[test]
fn test_side_effect_pass_survives_without_consumer() {
    init_logging();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let mut graph = ResourceGraph::new();
    graph.add_pass(
        "readback",
        |builder| {
            builder.side_effect();
            let t = builder.create_texture("scratch", color_desc(8, 8));
            builder.write(t)
        },
        move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );
    graph.compile().unwrap().execute(&mut DummyDriver::new()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_culling_follows_dependencies() {
    init_logging();
    let mut graph = ResourceGraph::new();
    let a = graph.add_pass(
        "a",
        |builder| {
            let t = builder.create_texture("a", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    let unused = graph.add_pass(
        "unused",
        |builder| {
            builder.sample(a);
            let t = builder.create_texture("unused", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    let b = graph.add_pass(
        "b",
        |builder| {
            builder.sample(a);
            let t = builder.create_texture("b", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    graph.present(b);
    let compiled = graph.compile().unwrap();

    assert_eq!(compiled.pass_names(), vec!["a", "b"]);
    assert_eq!(compiled.culled_passes().len(), 1);
    assert!(compiled.resource_lifetime(unused).is_none());
}

#[rstest]
#[case::overwrite_only(false, 0)]
#[case::read_then_overwrite(true, 1)]
fn test_overwritten_version_keeps_writer_only_when_read(
    #[case] second_reads: bool,
    #[case] expected_runs: usize,
) {
    init_logging();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut graph = ResourceGraph::new();
    let first = graph.add_pass(
        "first",
        |builder| {
            let t = builder.create_texture("color", color_desc(32, 32));
            let t = builder.write(t);
            let target = builder.create_render_target("first", RenderTargetDesc::new().with_color(t));
            (t, target)
        },
        move |data, resources, driver| {
            counter.fetch_add(1, Ordering::SeqCst);
            let out = resources.render_target(data.1);
            driver.begin_render_pass(out.target, &out.params);
            driver.end_render_pass();
            Ok(())
        },
    );
    let second = graph.add_pass(
        "second",
        |builder| {
            let t = if second_reads {
                builder.sample(first.0)
            } else {
                first.0
            };
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    graph.present(second);
    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.culled_passes().len(), 1 - expected_runs);

    let mut driver = DummyDriver::new();
    compiled.execute(&mut driver).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), expected_runs);
    assert_eq!(driver.render_targets_created(), expected_runs);
}

// ============================================================================
// Versioning
// ============================================================================

#[test]
fn test_downstream_reader_observes_written_version() {
    init_logging();
    let mut graph = ResourceGraph::new();
    let v0 = graph.add_pass(
        "create",
        |builder| {
            let t = builder.create_texture("t", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    let v1 = graph.add_pass(
        "modify",
        |builder| {
            let t = builder.read(v0);
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    assert_eq!(v0.index(), v1.index());
    assert_eq!(v1.version(), v0.version() + 1);

    graph.add_pass(
        "consume",
        |builder| {
            builder.side_effect();
            builder.sample(v1)
        },
        |_, _, _| Ok(()),
    );
    let compiled = graph.compile().unwrap();
    // The consumer runs after the last writer
    assert_eq!(compiled.pass_names(), vec!["create", "modify", "consume"]);
}

#[test]
#[should_panic(expected = "stale version")]
fn test_stale_handle_panics() {
    let mut graph = ResourceGraph::new();
    let v0 = graph.add_pass(
        "create",
        |builder| {
            let t = builder.create_texture("t", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    graph.add_pass(
        "modify",
        |builder| {
            let t = builder.read(v0);
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    graph.add_pass("late", |builder| builder.sample(v0), |_, _, _| Ok(()));
}

#[test]
#[should_panic(expected = "never written")]
fn test_reading_unwritten_texture_panics() {
    let mut graph = ResourceGraph::new();
    let t = graph.add_pass(
        "create only",
        |builder| builder.create_texture("t", color_desc(8, 8)),
        |_, _, _| Ok(()),
    );
    graph.add_pass("reader", |builder| builder.sample(t), |_, _, _| Ok(()));
}

// ============================================================================
// Lifetimes
// ============================================================================

#[test]
fn test_imported_texture_survives_and_transients_are_released() {
    init_logging();
    let mut driver = DummyDriver::new();
    let external = driver.create_texture(&color_desc(32, 32)).unwrap();

    let mut graph = ResourceGraph::new();
    let imported = graph.import_texture("backbuffer", color_desc(32, 32), external);
    let temp = graph.add_pass(
        "temp",
        |builder| {
            builder.sample(imported);
            let t = builder.create_texture("temp", color_desc(32, 32));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    let written = graph.add_pass(
        "composite",
        |builder| {
            builder.sample(temp);
            let out = builder.read(imported);
            builder.write(out)
        },
        |_, _, _| Ok(()),
    );
    graph.present(written);
    graph.compile().unwrap().execute(&mut driver).unwrap();

    assert!(driver.is_texture_alive(external));
    assert_eq!(driver.textures_created(), 2);
    assert_eq!(driver.textures_destroyed(), 1);
    assert_eq!(driver.live_texture_count(), 1);
}

#[test]
fn test_failing_pass_releases_everything() {
    init_logging();
    let mut graph = ResourceGraph::new();
    let first = graph.add_pass(
        "first",
        |builder| {
            let t = builder.create_texture("first", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Ok(()),
    );
    let second = graph.add_pass(
        "second",
        |builder| {
            builder.sample(first);
            let t = builder.create_texture("second", color_desc(8, 8));
            builder.write(t)
        },
        |_, _, _| Err(DriverError::DeviceLost),
    );
    graph.present(second);

    let mut driver = DummyDriver::new();
    let result = graph.compile().unwrap().execute(&mut driver);
    assert_eq!(result, Err(GraphError::Driver(DriverError::DeviceLost)));
    assert_eq!(driver.live_texture_count(), 0);
}
