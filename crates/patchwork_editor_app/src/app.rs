// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless editing session.
//!
//! Drives a [`Canvas`] the way the editor's UI loop does, without a window:
//! a background thread stands in for the engine's processing loop and the
//! session polls the path update timer once per frame until everything has
//! been committed.

use crate::scene::{LoadedScene, Scene, SceneError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use egui::Vec2;
use patchwork_editor_graph::engine::OutletMessage;
use patchwork_editor_graph::{
    Canvas, ConnectionError, ConnectionId, EditorConfig, Engine, InteractionController,
    InteractionOutcome, ObjectId, PathState, PointerEvent, RouteOutcome,
};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Scene could not be loaded
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// A scripted edit was refused
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The engine thread could not be started
    #[error("Failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine thread panicked
    #[error("Engine thread panicked")]
    EnginePanicked,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// UI frame period
    pub frame: Duration,
    /// Engine processing period
    pub engine_period: Duration,
    /// Give up waiting for the queue to drain after this long
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            frame: Duration::from_millis(16),
            engine_period: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Edits the engine thread makes on its first pass
#[derive(Debug, Default)]
struct EngineScript {
    moves: Vec<(ObjectId, Vec2)>,
    paths: Vec<(ConnectionId, PathState)>,
}

/// Stand-in for the engine's processing thread. Applies engine-side edits
/// and forwards messages sent by GUI objects.
struct EngineThread {
    stop_tx: Sender<()>,
    passes: Arc<AtomicUsize>,
    handle: Option<JoinHandle<usize>>,
}

impl EngineThread {
    fn spawn(
        engine: Arc<Engine>,
        period: Duration,
        script: EngineScript,
        forward: Sender<OutletMessage>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);
        let handle = std::thread::Builder::new()
            .name("engine".into())
            .spawn(move || Self::run(&engine, period, script, &stop_rx, &forward, &counter))?;
        Ok(Self {
            stop_tx,
            passes,
            handle: Some(handle),
        })
    }

    fn run(
        engine: &Engine,
        period: Duration,
        mut script: EngineScript,
        stop_rx: &Receiver<()>,
        forward: &Sender<OutletMessage>,
        passes: &AtomicUsize,
    ) -> usize {
        let mut processed = 0;
        loop {
            // One last pass after the stop request so nothing sent is lost
            let stopping = !matches!(stop_rx.recv_timeout(period), Err(RecvTimeoutError::Timeout));

            let messages = {
                let mut storage = engine.lock();
                for (object, delta) in script.moves.drain(..) {
                    match storage.object_bounds(object) {
                        Some(bounds) => storage.set_object_bounds(object, bounds.translate(delta)),
                        None => tracing::warn!(%object, "engine move for unknown object"),
                    }
                }
                for (connection, state) in script.paths.drain(..) {
                    if storage.set_path_state(&connection, state).is_none() {
                        tracing::warn!(%connection, "engine path for unknown connection");
                    }
                }
                storage.drain_messages()
            };

            for message in messages {
                tracing::trace!(
                    outlet = ?message.outlet,
                    message = %message.message,
                    "engine processed"
                );
                processed += 1;
                if forward.send(message).is_err() {
                    return processed;
                }
            }
            passes.fetch_add(1, Ordering::Release);
            if stopping {
                return processed;
            }
        }
    }

    /// Completed processing passes
    fn passes(&self) -> usize {
        self.passes.load(Ordering::Acquire)
    }

    fn stop(mut self) -> Result<usize, SessionError> {
        self.stop_tx.send(()).ok();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SessionError::EnginePanicked),
            None => Ok(0),
        }
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop_tx.send(()).ok();
            handle.join().ok();
        }
    }
}

/// What a session did
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Scene name
    pub scene: String,
    /// Objects on the canvas
    pub objects: usize,
    /// Connections on the canvas at the end
    pub connections: usize,
    /// Routing outcome per auto-routed connection
    pub routed: Vec<(ConnectionId, RouteOutcome)>,
    /// Outcomes of the scripted drags
    pub gestures: Vec<InteractionOutcome>,
    /// Timer ticks that ran
    pub ticks: usize,
    /// Path states written to the engine
    pub applied: usize,
    /// Queue entries dropped for missing connections
    pub dropped: usize,
    /// Messages processed by the engine thread
    pub messages: usize,
    /// Objects moved from the engine side
    pub synced_moves: usize,
    /// Connection paths changed from the engine side
    pub synced_paths: usize,
    /// Undo steps recorded
    pub undo_steps: usize,
    /// Label of the step an undo would revert
    pub undo_label: Option<String>,
    /// Final engine path state per connection
    pub states: Vec<(ConnectionId, PathState)>,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scene '{}'", self.scene)?;
        writeln!(f, "  objects: {}, connections: {}", self.objects, self.connections)?;
        for (id, outcome) in &self.routed {
            writeln!(f, "  routed {id}: {outcome:?}")?;
        }
        for outcome in &self.gestures {
            writeln!(f, "  gesture: {outcome:?}")?;
        }
        writeln!(
            f,
            "  ticks: {}, applied: {}, dropped: {}, undo steps: {}",
            self.ticks, self.applied, self.dropped, self.undo_steps
        )?;
        writeln!(
            f,
            "  engine messages: {}, engine moves: {}, engine paths: {}",
            self.messages, self.synced_moves, self.synced_paths
        )?;
        if let Some(label) = &self.undo_label {
            writeln!(f, "  next undo: {label}")?;
        }
        for (id, state) in &self.states {
            let shown = if state.is_empty() { "(plain)" } else { state.as_str() };
            writeln!(f, "  {id}: {shown}")?;
        }
        Ok(())
    }
}

/// A canvas with its engine, loaded from a scene
pub struct Session {
    canvas: Canvas,
    controller: InteractionController,
    scene: Scene,
    loaded: LoadedScene,
    options: SessionOptions,
}

impl Session {
    /// Load `scene` into a fresh in-memory engine
    pub fn new(
        scene: Scene,
        config: EditorConfig,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let engine = Arc::new(Engine::in_memory());
        let mut canvas = Canvas::new(engine, config);
        let loaded = scene.instantiate(&mut canvas)?;
        Ok(Self {
            canvas,
            controller: InteractionController::new(),
            scene,
            loaded,
            options,
        })
    }

    /// Run the scene's script and wait for the update queue to drain
    pub fn run(mut self) -> Result<SessionReport, SessionError> {
        let mut report = SessionReport {
            scene: self.scene.name.clone(),
            ..SessionReport::default()
        };

        let script = EngineScript {
            moves: self
                .scene
                .engine_moves
                .iter()
                .map(|m| Ok((self.loaded.object(&m.object)?, m.delta())))
                .collect::<Result<_, SceneError>>()?,
            paths: self
                .scene
                .engine_paths
                .iter()
                .map(|p| {
                    let id = self.loaded.connection_id(&p.from, &p.to)?;
                    Ok((id, PathState::from(p.path.as_str())))
                })
                .collect::<Result<_, SceneError>>()?,
        };
        let (forward_tx, forward_rx) = unbounded();
        let engine = EngineThread::spawn(
            Arc::clone(self.canvas.engine()),
            self.options.engine_period,
            script,
            forward_tx,
        )
        .map_err(SessionError::Spawn)?;

        for id in self.loaded.auto_route.clone() {
            let segmented = self.canvas.connection(&id).is_some_and(|c| c.is_segmented());
            let outcome = if segmented {
                self.canvas.find_path(&id)?
            } else {
                self.canvas.set_segmented(&id, true)?;
                self.canvas.find_path(&id)?
            };
            report.routed.push((id, outcome));
        }

        for name in &self.scene.clicks {
            let object = self.loaded.object(name)?;
            match self.canvas.click_object(object) {
                Some(message) => tracing::info!(object = %name, %message, "clicked"),
                None => tracing::info!(object = %name, "clicked, nothing sent"),
            }
        }

        for drag in self.scene.drags.clone() {
            let (from, to) = drag.points();
            report.gestures.push(self.gesture(from, to));
        }

        self.pump(&engine, &forward_rx, &mut report);

        report.messages = engine.stop()?;
        // Late messages from the last engine pass
        for message in forward_rx.try_iter() {
            self.route_message(&message);
        }

        report.objects = self.canvas.object_count();
        report.connections = self.canvas.connection_count();
        report.undo_steps = self.canvas.history().stats().undo_count;
        report.undo_label = self.canvas.history().undo_label().map(str::to_string);
        report.states = self
            .canvas
            .connections()
            .map(|c| {
                let state = self.canvas.engine().path_state(c.id()).unwrap_or_default();
                (c.id().clone(), state)
            })
            .collect();
        Ok(report)
    }

    fn gesture(&mut self, from: egui::Pos2, to: egui::Pos2) -> InteractionOutcome {
        let canvas = &mut self.canvas;
        let ctl = &mut self.controller;
        let pressed = ctl.handle(
            canvas,
            PointerEvent::Down {
                pos: from,
                modifiers: egui::Modifiers::NONE,
            },
        );
        if from == to {
            return pressed;
        }
        ctl.handle(canvas, PointerEvent::Drag { pos: to });
        let outcome = ctl.handle(canvas, PointerEvent::Up { pos: to });
        tracing::info!(?from, ?to, ?outcome, "replayed drag");
        outcome
    }

    /// Frame loop: sync engine-side moves and paths, deliver forwarded
    /// messages and poll the update timer until nothing is left to do.
    ///
    /// Anything the UI sends is only settled once the engine has completed
    /// a full pass that started after it.
    fn pump(
        &mut self,
        engine: &EngineThread,
        forward_rx: &Receiver<OutletMessage>,
        report: &mut SessionReport,
    ) {
        let started = Instant::now();
        let expected_moves = self.scene.engine_moves.len();
        let expected_paths = self.scene.engine_paths.len();
        let mut settled_at = engine.passes() + 2;
        loop {
            std::thread::sleep(self.options.frame);

            report.synced_moves += self.canvas.sync_object_bounds();
            report.synced_paths += self.canvas.sync_path_states();

            let passes = engine.passes();
            let mut delivered = 0;
            for message in forward_rx.try_iter() {
                delivered += self.route_message(&message);
            }
            if delivered > 0 {
                settled_at = passes + 2;
            }

            if let Some(tick) = self.canvas.poll(Instant::now()) {
                report.ticks += 1;
                report.applied += tick.applied;
                report.dropped += tick.dropped;
            }

            let idle = !self.canvas.updater().is_running()
                && engine.passes() >= settled_at
                && forward_rx.is_empty()
                && report.synced_moves >= expected_moves
                && report.synced_paths >= expected_paths;
            if idle {
                break;
            }
            if started.elapsed() > self.options.timeout {
                tracing::warn!(
                    pending = self.canvas.updater().pending(),
                    "timed out waiting for the update queue"
                );
                break;
            }
        }
    }

    /// Deliver a message to every object connected to its outlet. Returns
    /// the number of deliveries.
    fn route_message(&mut self, message: &OutletMessage) -> usize {
        let targets: Vec<ObjectId> = self
            .canvas
            .connections()
            .filter(|c| c.source() == message.outlet)
            .map(|c| c.destination().object)
            .collect();
        targets
            .into_iter()
            .filter(|&target| self.canvas.deliver_message(target, &message.message))
            .count()
    }
}

/// Load the bundled demo scene
pub fn demo_scene() -> Result<Scene, SceneError> {
    Scene::from_ron_str(include_str!("../scenes/demo.ron"))
}
