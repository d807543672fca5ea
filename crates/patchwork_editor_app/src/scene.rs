// SPDX-License-Identifier: MIT OR Apache-2.0
//! Patch scene files.
//!
//! A scene lists the objects of a patch, their connections with any stored
//! path states, and a script of edits for the headless driver to replay.
//! Objects are referred to by a scene-local name.

use egui::{pos2, vec2, Pos2, Rect, Vec2};
use indexmap::IndexMap;
use patchwork_editor_graph::gui_objects::{MessageBox, Toggle};
use patchwork_editor_graph::{
    Canvas, ConnectionError, ConnectionId, IoletRef, Object, ObjectId, ObjectKind, PathState,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Current scene format version
pub const SCENE_FORMAT_VERSION: u32 = 1;

/// Errors while loading or instantiating a scene
#[derive(Debug, Error)]
pub enum SceneError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RON syntax or type error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Scene written by a newer editor
    #[error("Scene version {0} is newer than supported version {SCENE_FORMAT_VERSION}")]
    UnsupportedVersion(u32),

    /// Two objects share a name
    #[error("Duplicate object name: {0}")]
    DuplicateObject(String),

    /// Reference to an object the scene does not define
    #[error("Unknown object: {0}")]
    UnknownObject(String),

    /// A connection the canvas refused
    #[error("Cannot connect {from} -> {to}: {source}")]
    Connection {
        /// Source object name
        from: String,
        /// Destination object name
        to: String,
        /// Why the canvas refused it
        source: ConnectionError,
    },
}

/// Object kinds a scene can describe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SceneObjectKind {
    /// `[tgl]`
    Toggle {
        /// Value sent when switching on
        #[serde(default = "default_nonzero")]
        nonzero: f32,
    },
    /// Message box with its text
    Message(String),
    /// `[cnv]` decoration
    Canvas,
    /// Any other object by creation text
    Text(String),
}

fn default_nonzero() -> f32 {
    1.0
}

/// One object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    /// Scene-local name
    pub name: String,
    /// Kind and initial state
    pub kind: SceneObjectKind,
    /// `(x, y, width, height)`, written as a RON tuple
    pub bounds: [f32; 4],
    /// Inlet signal flags; `None` keeps the kind's defaults
    #[serde(default)]
    pub inlets: Option<Vec<bool>>,
    /// Outlet signal flags; `None` keeps the kind's defaults
    #[serde(default)]
    pub outlets: Option<Vec<bool>>,
}

impl SceneObject {
    fn rect(&self) -> Rect {
        let [x, y, w, h] = self.bounds;
        Rect::from_min_size(pos2(x, y), vec2(w, h))
    }

    fn to_object(&self) -> Object {
        let kind = match &self.kind {
            SceneObjectKind::Toggle { nonzero } => ObjectKind::Toggle(Toggle {
                nonzero: *nonzero,
                ..Toggle::default()
            }),
            SceneObjectKind::Message(text) => ObjectKind::Message(MessageBox::new(text.clone())),
            SceneObjectKind::Canvas => ObjectKind::Canvas,
            SceneObjectKind::Text(text) => ObjectKind::Text(text.clone()),
        };
        let mut object = Object::new(kind, self.rect());
        if self.inlets.is_some() || self.outlets.is_some() {
            let inlets: Vec<bool> = match &self.inlets {
                Some(flags) => flags.clone(),
                None => object.inlets.iter().map(|i| i.is_signal).collect(),
            };
            let outlets: Vec<bool> = match &self.outlets {
                Some(flags) => flags.clone(),
                None => object.outlets.iter().map(|o| o.is_signal).collect(),
            };
            object = object.with_iolets(&inlets, &outlets);
        }
        object
    }
}

/// One connection, `(object name, iolet index)` on each side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConnection {
    /// Outlet side
    pub from: (String, usize),
    /// Inlet side
    pub to: (String, usize),
    /// Stored path state; empty for plain connections
    #[serde(default)]
    pub path: String,
    /// Route around obstacles after loading
    #[serde(default)]
    pub auto_route: bool,
}

/// A scripted pointer drag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDrag {
    /// Press position
    pub from: [f32; 2],
    /// Release position
    pub to: [f32; 2],
}

impl SceneDrag {
    /// Press and release points
    pub fn points(&self) -> (Pos2, Pos2) {
        (pos2(self.from[0], self.from[1]), pos2(self.to[0], self.to[1]))
    }
}

/// An object move performed on the engine side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMove {
    /// Object name
    pub object: String,
    /// Offset
    pub by: [f32; 2],
}

impl SceneMove {
    /// Offset as a vector
    pub fn delta(&self) -> Vec2 {
        vec2(self.by[0], self.by[1])
    }
}

/// A path state written on the engine side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePath {
    /// Outlet side
    pub from: (String, usize),
    /// Inlet side
    pub to: (String, usize),
    /// State to write
    pub path: String,
}

/// A patch scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Format version
    #[serde(default)]
    pub version: u32,
    /// Display name
    pub name: String,
    /// Objects
    pub objects: Vec<SceneObject>,
    /// Connections
    #[serde(default)]
    pub connections: Vec<SceneConnection>,
    /// Objects to click once loaded
    #[serde(default)]
    pub clicks: Vec<String>,
    /// Pointer drags to replay once loaded
    #[serde(default)]
    pub drags: Vec<SceneDrag>,
    /// Moves applied by the engine thread
    #[serde(default)]
    pub engine_moves: Vec<SceneMove>,
    /// Path states written by the engine thread
    #[serde(default)]
    pub engine_paths: Vec<ScenePath>,
}

/// Canvas identities of a loaded scene
#[derive(Debug, Default)]
pub struct LoadedScene {
    /// Object IDs by scene name
    pub objects: IndexMap<String, ObjectId>,
    /// Connections in scene order
    pub connections: Vec<ConnectionId>,
    /// Connections to route after loading
    pub auto_route: Vec<ConnectionId>,
}

impl LoadedScene {
    /// Look up an object by scene name
    pub fn object(&self, name: &str) -> Result<ObjectId, SceneError> {
        self.objects
            .get(name)
            .copied()
            .ok_or_else(|| SceneError::UnknownObject(name.to_string()))
    }

    /// Identity of the connection between two named iolets
    pub fn connection_id(
        &self,
        from: &(String, usize),
        to: &(String, usize),
    ) -> Result<ConnectionId, SceneError> {
        let outlet = IoletRef::outlet(self.object(&from.0)?, from.1);
        let inlet = IoletRef::inlet(self.object(&to.0)?, to.1);
        Ok(ConnectionId::new(&outlet, &inlet))
    }
}

impl Scene {
    /// Parse a RON document
    pub fn from_ron_str(text: &str) -> Result<Self, SceneError> {
        let scene: Scene = ron::from_str(text)?;
        if scene.version > SCENE_FORMAT_VERSION {
            return Err(SceneError::UnsupportedVersion(scene.version));
        }
        Ok(scene)
    }

    /// Load a scene from a file
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Create the scene's objects and connections on `canvas`.
    ///
    /// Connections are written to the engine with their stored state first
    /// and then adopted by the canvas, the way an opened patch is.
    pub fn instantiate(&self, canvas: &mut Canvas) -> Result<LoadedScene, SceneError> {
        let mut loaded = LoadedScene::default();

        for obj in &self.objects {
            if loaded.objects.contains_key(&obj.name) {
                return Err(SceneError::DuplicateObject(obj.name.clone()));
            }
            let id = canvas.add_object(obj.to_object());
            loaded.objects.insert(obj.name.clone(), id);
        }

        for conn in &self.connections {
            let outlet = IoletRef::outlet(loaded.object(&conn.from.0)?, conn.from.1);
            let inlet = IoletRef::inlet(loaded.object(&conn.to.0)?, conn.to.1);
            let refused = |source| SceneError::Connection {
                from: conn.from.0.clone(),
                to: conn.to.0.clone(),
                source,
            };

            let id = ConnectionId::new(&outlet, &inlet);
            if canvas.contains_connection(&id) {
                return Err(refused(ConnectionError::AlreadyConnected(id)));
            }
            {
                let mut storage = canvas.engine().lock();
                storage.connect(&id);
                storage.set_path_state(&id, PathState::from(conn.path.as_str()));
            }
            let id = match canvas.load_connection(outlet, inlet) {
                Ok(id) => id,
                Err(err) => {
                    canvas.engine().lock().disconnect(&id);
                    return Err(refused(err));
                }
            };
            if conn.auto_route {
                loaded.auto_route.push(id.clone());
            }
            loaded.connections.push(id);
        }

        tracing::info!(
            scene = %self.name,
            objects = loaded.objects.len(),
            connections = loaded.connections.len(),
            "scene loaded"
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_editor_graph::{EditorConfig, Engine};
    use std::sync::Arc;

    const SMALL: &str = r#"(
        version: 1,
        name: "small",
        objects: [
            (
                name: "osc",
                kind: Text("osc~ 440"),
                bounds: (0.0, 0.0, 60.0, 20.0),
                inlets: Some([true, false]),
                outlets: Some([true]),
            ),
            (
                name: "out",
                kind: Text("dac~"),
                bounds: (0.0, 200.0, 60.0, 20.0),
                inlets: Some([true, true]),
                outlets: Some([]),
            ),
            (name: "tgl", kind: Toggle(nonzero: 1.0), bounds: (200.0, 0.0, 15.0, 15.0)),
        ],
        connections: [
            (from: ("osc", 0), to: ("out", 0), path: "3.5 20, 3.5 200"),
            (from: ("osc", 0), to: ("out", 1), auto_route: true),
        ],
        clicks: ["tgl"],
    )"#;

    fn canvas() -> Canvas {
        Canvas::new(Arc::new(Engine::in_memory()), EditorConfig::default())
    }

    #[test]
    fn test_parse_scene() {
        let scene = Scene::from_ron_str(SMALL).unwrap();
        assert_eq!(scene.objects.len(), 3);
        assert_eq!(scene.objects[2].kind, SceneObjectKind::Toggle { nonzero: 1.0 });
        assert!(scene.connections[1].auto_route);
        assert!(scene.connections[1].path.is_empty());
        assert!(scene.drags.is_empty());
    }

    #[test]
    fn test_bounds_are_tuples() {
        let scene = Scene::from_ron_str(include_str!("../scenes/demo.ron")).unwrap();
        assert_eq!(scene.objects[1].bounds, [-30.0, 90.0, 140.0, 20.0]);
        assert_eq!(scene.drags[0].points(), (pos2(3.5, 20.0), pos2(203.5, 80.0)));
        assert_eq!(scene.engine_moves[0].delta(), vec2(40.0, 0.0));

        let text = SMALL.replacen(
            "bounds: (0.0, 0.0, 60.0, 20.0)",
            "bounds: [0.0, 0.0, 60.0, 20.0]",
            1,
        );
        assert!(matches!(Scene::from_ron_str(&text), Err(SceneError::Parse(_))));
    }

    #[test]
    fn test_newer_version_rejected() {
        let text = SMALL.replacen("version: 1", "version: 9", 1);
        assert!(matches!(
            Scene::from_ron_str(&text),
            Err(SceneError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_instantiate() {
        let scene = Scene::from_ron_str(SMALL).unwrap();
        let mut canvas = canvas();
        let loaded = scene.instantiate(&mut canvas).unwrap();

        assert_eq!(canvas.object_count(), 3);
        assert_eq!(loaded.connections.len(), 2);
        assert_eq!(loaded.auto_route.len(), 1);

        let first = canvas.connection(&loaded.connections[0]).unwrap();
        assert!(first.is_signal);
        assert!(first.is_segmented());
        assert_eq!(
            canvas.engine().path_state(&loaded.connections[0]),
            Some(PathState::from("3.5 20, 3.5 200"))
        );
        assert!(!canvas.connection(&loaded.connections[1]).unwrap().is_segmented());
    }

    #[test]
    fn test_unknown_object() {
        let text = SMALL.replacen(r#"to: ("out", 1)"#, r#"to: ("nowhere", 1)"#, 1);
        let scene = Scene::from_ron_str(&text).unwrap();
        assert!(matches!(
            scene.instantiate(&mut canvas()),
            Err(SceneError::UnknownObject(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_refused_connection() {
        // Signal outlet into the toggle's control inlet
        let text = SMALL.replacen(r#"to: ("out", 1)"#, r#"to: ("tgl", 0)"#, 1);
        let scene = Scene::from_ron_str(&text).unwrap();
        assert!(matches!(
            scene.instantiate(&mut canvas()),
            Err(SceneError::Connection {
                source: ConnectionError::IncompatibleIolets { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let text = SMALL.replacen(r#"name: "tgl""#, r#"name: "osc""#, 1);
        let scene = Scene::from_ron_str(&text).unwrap();
        assert!(matches!(
            scene.instantiate(&mut canvas()),
            Err(SceneError::DuplicateObject(name)) if name == "osc"
        ));
    }
}
