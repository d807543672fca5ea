//! End-to-end editing sessions: pointer gestures on the canvas, batched
//! writes into a shared engine, engine-side edits and undo.

use egui::{pos2, vec2, Modifiers, Pos2, Rect};
use parking_lot::Mutex;
use patchwork_editor_graph::engine::OutletMessage;
use patchwork_editor_graph::geometry::is_orthogonal;
use patchwork_editor_graph::gui_objects::Toggle;
use patchwork_editor_graph::{
    Canvas, ChangeKind, ChangePayload, ConnectionId, EditorConfig, Engine, EntityKey,
    InteractionController, InteractionOutcome, IoletRef, Message, Object, ObjectId, ObjectKind,
    PathState, PointerEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Session {
    engine: Arc<Engine>,
    canvas: Canvas,
    ctl: InteractionController,
    c: ObjectId,
}

fn session() -> Session {
    let engine = Arc::new(Engine::in_memory());
    let mut canvas = Canvas::new(Arc::clone(&engine), EditorConfig::default());
    let boxed = |x: f32, y: f32| {
        Object::text(
            "obj",
            Rect::from_min_size(pos2(x, y), vec2(40.0, 20.0)),
            &[false],
            &[false],
        )
    };
    canvas.add_object(boxed(0.0, 0.0));
    let c = canvas.add_object(boxed(200.0, 200.0));
    Session {
        engine,
        canvas,
        ctl: InteractionController::new(),
        c,
    }
}

fn gesture(s: &mut Session, from: Pos2, to: Pos2) -> InteractionOutcome {
    s.ctl.handle(
        &mut s.canvas,
        PointerEvent::Down {
            pos: from,
            modifiers: Modifiers::NONE,
        },
    );
    s.ctl.handle(&mut s.canvas, PointerEvent::Drag { pos: to });
    s.ctl.handle(&mut s.canvas, PointerEvent::Up { pos: to })
}

/// Connect a's outlet to c's inlet by dragging, then make it segmented
fn segmented_connection(s: &mut Session) -> ConnectionId {
    let id = match gesture(s, pos2(3.5, 20.0), pos2(203.5, 200.0)) {
        InteractionOutcome::Connected(id) => id,
        other => panic!("expected a connection, got {other:?}"),
    };
    s.canvas.set_segmented(&id, true).unwrap();
    s.canvas.flush();
    id
}

const Z_ROUTE: &str = "3.5 20, 3.5 110, 203.5 110, 203.5 200";
const DRAGGED: &str = "3.5 20, 3.5 140, 203.5 140, 203.5 200";

#[test]
fn test_segment_drag_reaches_engine_and_undoes() {
    let mut s = session();
    let id = segmented_connection(&mut s);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(Z_ROUTE)));

    let seen: Arc<Mutex<Vec<ChangeKind>>> = Arc::default();
    let sink = Arc::clone(&seen);
    s.canvas.events_mut().subscribe(
        EntityKey::Connection(id.clone()),
        move |kind: ChangeKind, _: &ChangePayload| sink.lock().push(kind),
    );

    let outcome = gesture(&mut s, pos2(100.0, 110.0), pos2(140.0, 140.0));
    assert_eq!(outcome, InteractionOutcome::PathCommitted(id.clone()));

    // Nothing reaches the engine before the batching window closes
    assert!(s.canvas.poll(Instant::now()).is_none());
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(Z_ROUTE)));

    let report = s.canvas.poll(Instant::now() + Duration::from_millis(100)).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(DRAGGED)));
    assert_eq!(s.canvas.connection(&id).unwrap().path_state(), PathState::from(DRAGGED));

    assert_eq!(s.canvas.undo().unwrap(), 1);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(Z_ROUTE)));
    assert_eq!(s.canvas.connection(&id).unwrap().plan()[1], pos2(3.5, 110.0));

    assert_eq!(s.canvas.redo().unwrap(), 1);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(DRAGGED)));

    let seen = seen.lock();
    assert!(seen.iter().filter(|k| **k == ChangeKind::PathChanged).count() >= 3);
}

#[test]
fn test_engine_side_move_reanchors_path() {
    let mut s = session();
    let id = segmented_connection(&mut s);

    let engine = Arc::clone(&s.engine);
    let c = s.c;
    std::thread::spawn(move || {
        let mut storage = engine.lock();
        let bounds = storage.object_bounds(c).unwrap();
        storage.set_object_bounds(c, bounds.translate(vec2(50.0, 0.0)));
    })
    .join()
    .unwrap();

    assert_eq!(s.canvas.sync_object_bounds(), 1);
    let conn = s.canvas.connection(&id).unwrap();
    assert_eq!(conn.anchors().1, pos2(253.5, 200.0));
    assert!(is_orthogonal(conn.plan()));
    assert_eq!(conn.plan()[1], pos2(3.5, 110.0));

    // Following an object does not persist anything by itself
    assert_eq!(s.canvas.updater().pending(), 0);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(Z_ROUTE)));
}

#[test]
fn test_background_producers_and_ui_edits_coalesce() {
    let mut s = session();
    let id = segmented_connection(&mut s);

    let handle = s.canvas.update_handle();
    let target = id.clone();
    std::thread::spawn(move || {
        for i in 0..20 {
            let state = PathState::from(format!("3.5 20, 3.5 {i}, 203.5 {i}, 203.5 200"));
            handle.push_path_state(target.clone(), state);
        }
    })
    .join()
    .unwrap();

    s.canvas.commit_path(&id).unwrap();
    let report = s.canvas.flush();

    assert_eq!(report.drained, 21);
    assert_eq!(report.coalesced, 20);
    assert_eq!(s.engine.path_state(&id), Some(PathState::from(Z_ROUTE)));
}

#[test]
fn test_removed_object_drops_queued_state() {
    let mut s = session();
    let id = segmented_connection(&mut s);
    let undo_before = s.canvas.history().stats().undo_count;

    gesture(&mut s, pos2(100.0, 110.0), pos2(140.0, 140.0));
    s.canvas.remove_object(s.c);

    let report = s.canvas.flush();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.applied, 0);
    assert!(!s.canvas.contains_connection(&id));
    assert_eq!(s.engine.path_state(&id), None);
    assert_eq!(s.canvas.history().stats().undo_count, undo_before);
}

#[test]
fn test_toggle_click_reaches_engine() {
    let mut s = session();
    let toggle = s.canvas.add_object(Object::new(
        ObjectKind::Toggle(Toggle::default()),
        Rect::from_min_size(pos2(300.0, 0.0), vec2(30.0, 30.0)),
    ));

    let outcome = s.ctl.handle(
        &mut s.canvas,
        PointerEvent::Down {
            pos: pos2(315.0, 15.0),
            modifiers: Modifiers::NONE,
        },
    );
    assert!(matches!(outcome, InteractionOutcome::Clicked { object, .. } if object == toggle));

    let sent = s.engine.lock().drain_messages();
    assert_eq!(
        sent,
        vec![OutletMessage {
            outlet: IoletRef::outlet(toggle, 0),
            message: Message::float(1.0),
        }]
    );

    // The engine echoes a value back; the toggle only updates its display
    assert!(s.canvas.deliver_message(toggle, &Message::float(0.0)));
    assert!(matches!(
        &s.canvas.object(toggle).unwrap().kind,
        ObjectKind::Toggle(t) if !t.is_on()
    ));
}
