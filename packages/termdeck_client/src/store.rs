//! Client-side view of the server's sessions.
//!
//! The server is authoritative for which sessions exist and their size. The
//! store layers what only the client knows on top: grid placement, font size
//! and whether a terminal is showing live output or a history snapshot.

use std::collections::HashMap;

use termdeck_protocol::{ClientMessage, Scene, ServerMessage, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::layout::{LayoutRect, LayoutStore, Layouts, PersistedLayout};

pub const DEFAULT_FONT_SIZE: u32 = 16;
pub const MIN_FONT_SIZE: u32 = 8;
pub const MAX_FONT_SIZE: u32 = 40;

/// What the client tracks for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalView {
    pub id: SessionId,
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub layout: LayoutRect,
    pub font_size: u32,
    pub is_history_view: bool,
    /// Lines back from the live end; 0 exactly when live
    pub scrollback_offset: usize,
}

/// Receives text to render for one terminal.
pub trait TerminalSink: Send {
    fn write(&mut self, data: &str);
}

impl<F> TerminalSink for F
where
    F: FnMut(&str) + Send,
{
    fn write(&mut self, data: &str) {
        self(data)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Fire-and-forget sender for the current connection.
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    tx: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { tx: Some(tx) }
    }

    /// An outbox with no connection behind it.
    pub fn closed() -> Self {
        Self::default()
    }

    /// Returns false, with a warning, when no connection is open.
    pub fn send(&self, message: ClientMessage) -> bool {
        let kind = message.kind();
        let sent = match &self.tx {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if !sent {
            warn!("Cannot send {}, connection not open", kind);
        }
        sent
    }
}

pub struct ClientSyncStore {
    views: HashMap<SessionId, TerminalView>,
    /// Scene order
    order: Vec<SessionId>,
    sinks: HashMap<SessionId, Box<dyn TerminalSink>>,
    layouts: Box<dyn LayoutStore>,
    outbox: Outbox,
}

impl ClientSyncStore {
    pub fn new(layouts: Box<dyn LayoutStore>) -> Self {
        Self {
            views: HashMap::new(),
            order: Vec::new(),
            sinks: HashMap::new(),
            layouts,
            outbox: Outbox::closed(),
        }
    }

    pub fn set_outbox(&mut self, outbox: Outbox) {
        self.outbox = outbox;
    }

    pub fn view(&self, id: &SessionId) -> Option<&TerminalView> {
        self.views.get(id)
    }

    /// Tracked views in scene order.
    pub fn views(&self) -> Vec<TerminalView> {
        self.order
            .iter()
            .filter_map(|id| self.views.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    // --- Sinks ---

    pub fn register_sink(&mut self, id: SessionId, sink: Box<dyn TerminalSink>) {
        self.sinks.insert(id, sink);
    }

    pub fn unregister_sink(&mut self, id: &SessionId) -> bool {
        self.sinks.remove(id).is_some()
    }

    pub fn has_sink(&self, id: &SessionId) -> bool {
        self.sinks.contains_key(id)
    }

    /// Forget every view. Sinks stay registered.
    pub fn clear_views(&mut self) {
        self.views.clear();
        self.order.clear();
    }

    /// Forget every view and sink.
    pub fn clear(&mut self) {
        self.clear_views();
        self.sinks.clear();
    }

    // --- Inbound ---

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Scene { data } => self.apply_scene(data),
            ServerMessage::Output { id, data } => self.handle_output(&id, &data),
            ServerMessage::HistoryChunk {
                id,
                data,
                lines_back,
            } => self.handle_history_chunk(&id, &data, lines_back),
        }
    }

    pub fn apply_scene(&mut self, scene: Scene) {
        let persisted = self.layouts.load();
        let mut views = HashMap::with_capacity(scene.terminals.len());
        let mut order = Vec::with_capacity(scene.terminals.len());

        for info in scene.terminals {
            let existing = self.views.get(&info.id);
            let stored = persisted.get(&info.id);

            let layout = existing
                .map(|v| v.layout)
                .or_else(|| stored.map(PersistedLayout::rect))
                .unwrap_or_default();
            let font_size = existing
                .map(|v| v.font_size)
                .or_else(|| stored.and_then(|p| p.font_size))
                .unwrap_or(DEFAULT_FONT_SIZE);
            let (is_history_view, scrollback_offset) = existing
                .map(|v| (v.is_history_view, v.scrollback_offset))
                .unwrap_or((false, 0));

            order.push(info.id.clone());
            views.insert(
                info.id.clone(),
                TerminalView {
                    id: info.id,
                    name: info.name,
                    cols: info.cols,
                    rows: info.rows,
                    layout,
                    font_size,
                    is_history_view,
                    scrollback_offset,
                },
            );
        }

        self.sinks.retain(|id, _| {
            let keep = views.contains_key(id);
            if !keep {
                debug!(session = %id, "Releasing sink for vanished terminal");
            }
            keep
        });
        self.views = views;
        self.order = order;
        self.persist_layouts();
    }

    fn handle_output(&mut self, id: &SessionId, data: &str) {
        let Some(view) = self.views.get(id) else {
            debug!(session = %id, "Output for untracked terminal");
            return;
        };
        if view.is_history_view {
            return;
        }
        if let Some(sink) = self.sinks.get_mut(id) {
            sink.write(data);
        }
    }

    fn handle_history_chunk(&mut self, id: &SessionId, data: &str, lines_back: usize) {
        if let Some(view) = self.views.get_mut(id) {
            view.scrollback_offset = lines_back;
            view.is_history_view = lines_back > 0;
        }
        if let Some(sink) = self.sinks.get_mut(id) {
            sink.write(data);
        }
    }

    // --- History ---

    pub fn enter_history(&mut self, id: &SessionId) {
        let Some(view) = self.views.get_mut(id) else {
            return;
        };
        view.is_history_view = true;
        view.scrollback_offset = 1;
        self.request_history(id, 1);
    }

    pub fn exit_history(&mut self, id: &SessionId) {
        let Some(view) = self.views.get_mut(id) else {
            return;
        };
        view.is_history_view = false;
        view.scrollback_offset = 0;
        self.request_history(id, 0);
    }

    /// Move half a screen. Scrolling down while live does nothing.
    pub fn scroll(&mut self, id: &SessionId, direction: ScrollDirection) {
        let Some(view) = self.views.get_mut(id) else {
            return;
        };
        let step = (view.rows as usize / 2).max(1);

        let offset = match (view.is_history_view, direction) {
            (false, ScrollDirection::Up) => step,
            (false, ScrollDirection::Down) => return,
            (true, ScrollDirection::Up) => view.scrollback_offset + step,
            (true, ScrollDirection::Down) => view.scrollback_offset.saturating_sub(step),
        };

        if offset == 0 {
            self.exit_history(id);
            return;
        }
        view.is_history_view = true;
        view.scrollback_offset = offset;
        self.request_history(id, offset);
    }

    fn request_history(&self, id: &SessionId, lines_back: usize) {
        debug!(session = %id, lines_back, "Requesting history");
        self.outbox.send(ClientMessage::RequestHistory {
            id: id.clone(),
            lines_back,
        });
    }

    // --- Commands ---

    pub fn request_scene(&self) -> bool {
        self.outbox.send(ClientMessage::GiveScene)
    }

    pub fn create_terminal(&self) -> bool {
        self.outbox.send(ClientMessage::Create)
    }

    pub fn close_terminal(&self, id: &SessionId) -> bool {
        self.outbox.send(ClientMessage::Close { id: id.clone() })
    }

    pub fn send_input(&self, id: &SessionId, data: impl Into<String>) -> bool {
        self.outbox.send(ClientMessage::Input {
            id: id.clone(),
            data: data.into(),
        })
    }

    /// Ignored unless both dimensions are positive. The local size is
    /// updated without waiting for the server.
    pub fn resize_terminal(&mut self, id: &SessionId, cols: u16, rows: u16) -> bool {
        if cols == 0 || rows == 0 {
            return false;
        }
        let sent = self.outbox.send(ClientMessage::Resize {
            id: id.clone(),
            cols: cols.into(),
            rows: rows.into(),
        });
        if let Some(view) = self.views.get_mut(id) {
            view.cols = cols;
            view.rows = rows;
        }
        sent
    }

    pub fn update_layout(&mut self, id: &SessionId, layout: LayoutRect) {
        let Some(view) = self.views.get_mut(id) else {
            return;
        };
        view.layout = layout;
        self.persist_layouts();
    }

    pub fn update_font_size(&mut self, id: &SessionId, font_size: u32) {
        let Some(view) = self.views.get_mut(id) else {
            return;
        };
        view.font_size = font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.persist_layouts();
    }

    fn persist_layouts(&mut self) {
        let layouts: Layouts = self
            .views
            .values()
            .map(|v| (v.id.clone(), PersistedLayout::new(v.layout, v.font_size)))
            .collect();
        self.layouts.save(&layouts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MemoryLayoutStore;
    use std::sync::{Arc, Mutex};
    use termdeck_protocol::TerminalInfo;

    struct Harness {
        store: ClientSyncStore,
        layouts: MemoryLayoutStore,
        sent: mpsc::UnboundedReceiver<ClientMessage>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_layouts(MemoryLayoutStore::new())
        }

        fn with_layouts(layouts: MemoryLayoutStore) -> Self {
            let (tx, sent) = mpsc::unbounded_channel();
            let mut store = ClientSyncStore::new(Box::new(layouts.clone()));
            store.set_outbox(Outbox::new(tx));
            Self {
                store,
                layouts,
                sent,
            }
        }

        fn sent(&mut self) -> Vec<ClientMessage> {
            let mut out = Vec::new();
            while let Ok(message) = self.sent.try_recv() {
                out.push(message);
            }
            out
        }

        fn sink(&mut self, id: &str) -> Arc<Mutex<Vec<String>>> {
            let written = Arc::new(Mutex::new(Vec::new()));
            let target = Arc::clone(&written);
            self.store.register_sink(
                id.into(),
                Box::new(move |data: &str| target.lock().unwrap().push(data.to_string())),
            );
            written
        }
    }

    fn scene(ids: &[&str]) -> Scene {
        Scene {
            terminals: ids
                .iter()
                .map(|id| TerminalInfo {
                    id: (*id).into(),
                    name: Some(format!("Terminal {id}")),
                    cols: 80,
                    rows: 24,
                })
                .collect(),
        }
    }

    fn history(id: &str) -> ClientMessage {
        ClientMessage::RequestHistory {
            id: id.into(),
            lines_back: 0,
        }
    }

    fn request(id: &str, lines_back: usize) -> ClientMessage {
        ClientMessage::RequestHistory {
            id: id.into(),
            lines_back,
        }
    }

    #[test]
    fn new_sessions_get_default_layout() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a", "b"]));

        let views = h.store.views();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, SessionId::from("a"));
        assert_eq!(views[0].layout, LayoutRect::default());
        assert_eq!(views[0].font_size, DEFAULT_FONT_SIZE);
        assert!(!views[0].is_history_view);

        // every tracked session is persisted
        assert_eq!(h.layouts.snapshot().len(), 2);
    }

    #[test]
    fn scene_prefers_memory_then_storage() {
        let mut stored = Layouts::new();
        stored.insert(
            "a".into(),
            PersistedLayout::new(LayoutRect { x: 3, y: 3, w: 3, h: 3 }, 20),
        );
        stored.insert(
            "b".into(),
            PersistedLayout {
                x: 7,
                y: 0,
                w: 5,
                h: 5,
                font_size: None,
            },
        );
        let mut h = Harness::with_layouts(MemoryLayoutStore::with_layouts(stored));

        h.store.apply_scene(scene(&["a", "b", "c"]));
        let a = h.store.view(&"a".into()).unwrap().clone();
        assert_eq!(a.layout, LayoutRect { x: 3, y: 3, w: 3, h: 3 });
        assert_eq!(a.font_size, 20);
        let b = h.store.view(&"b".into()).unwrap();
        assert_eq!(b.layout.x, 7);
        assert_eq!(b.font_size, DEFAULT_FONT_SIZE);

        // in-memory state wins over what storage says
        h.store
            .update_layout(&"a".into(), LayoutRect { x: 9, y: 9, w: 2, h: 2 });
        let mut overwritten = h.layouts.snapshot();
        overwritten.insert("a".into(), PersistedLayout::new(LayoutRect::default(), 8));
        h.layouts.clone().save(&overwritten);
        h.store.apply_scene(scene(&["a", "b", "c"]));
        assert_eq!(h.store.view(&"a".into()).unwrap().layout.x, 9);
    }

    #[test]
    fn scene_keeps_server_fields_and_history_state() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));
        h.store.enter_history(&"a".into());

        let mut resized = scene(&["a"]);
        resized.terminals[0].cols = 132;
        resized.terminals[0].name = None;
        h.store.apply_scene(resized);

        let a = h.store.view(&"a".into()).unwrap();
        assert_eq!(a.cols, 132);
        assert_eq!(a.name, None);
        assert!(a.is_history_view);
        assert_eq!(a.scrollback_offset, 1);
    }

    #[test]
    fn vanished_sessions_drop_views_and_sinks() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a", "b"]));
        h.sink("a");
        h.sink("b");

        h.store.apply_scene(scene(&["b"]));
        assert!(h.store.view(&"a".into()).is_none());
        assert!(!h.store.has_sink(&"a".into()));
        assert!(h.store.has_sink(&"b".into()));
        assert_eq!(
            h.layouts.snapshot().keys().cloned().collect::<Vec<_>>(),
            vec![SessionId::from("b")]
        );
    }

    #[test]
    fn live_output_is_rendered_until_history_view() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));
        let written = h.sink("a");

        h.store.handle_message(ServerMessage::Output {
            id: "a".into(),
            data: "live\n".into(),
        });
        h.store.enter_history(&"a".into());
        h.store.handle_message(ServerMessage::Output {
            id: "a".into(),
            data: "hidden\n".into(),
        });
        h.store.handle_message(ServerMessage::Output {
            id: "unknown".into(),
            data: "nobody\n".into(),
        });

        assert_eq!(*written.lock().unwrap(), vec!["live\n".to_string()]);
    }

    #[test]
    fn history_chunk_adopts_confirmed_offset() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));
        let written = h.sink("a");
        h.store.scroll(&"a".into(), ScrollDirection::Up);
        assert_eq!(h.store.view(&"a".into()).unwrap().scrollback_offset, 12);

        // server had fewer lines than asked for
        h.store.handle_message(ServerMessage::HistoryChunk {
            id: "a".into(),
            data: "\x1b[2J\x1b[Hold".into(),
            lines_back: 5,
        });
        let a = h.store.view(&"a".into()).unwrap();
        assert_eq!(a.scrollback_offset, 5);
        assert!(a.is_history_view);

        h.store.handle_message(ServerMessage::HistoryChunk {
            id: "a".into(),
            data: "\x1b[2J\x1b[Hnew".into(),
            lines_back: 0,
        });
        let a = h.store.view(&"a".into()).unwrap();
        assert_eq!(a.scrollback_offset, 0);
        assert!(!a.is_history_view);
        assert_eq!(written.lock().unwrap().len(), 2);
    }

    #[test]
    fn enter_and_exit_history() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));

        h.store.enter_history(&"a".into());
        let a = h.store.view(&"a".into()).unwrap();
        assert!(a.is_history_view);
        assert_eq!(a.scrollback_offset, 1);

        h.store.exit_history(&"a".into());
        let a = h.store.view(&"a".into()).unwrap();
        assert!(!a.is_history_view);
        assert_eq!(a.scrollback_offset, 0);

        assert_eq!(h.sent(), vec![request("a", 1), history("a")]);
    }

    #[test]
    fn scrolling_steps_half_a_screen() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));
        let id = SessionId::from("a");

        h.store.scroll(&id, ScrollDirection::Down);
        assert!(h.sent().is_empty());
        assert!(!h.store.view(&id).unwrap().is_history_view);

        h.store.scroll(&id, ScrollDirection::Up);
        h.store.scroll(&id, ScrollDirection::Up);
        h.store.scroll(&id, ScrollDirection::Down);
        assert_eq!(h.store.view(&id).unwrap().scrollback_offset, 12);
        h.store.scroll(&id, ScrollDirection::Down);

        let view = h.store.view(&id).unwrap();
        assert!(!view.is_history_view);
        assert_eq!(view.scrollback_offset, 0);
        assert_eq!(
            h.sent(),
            vec![request("a", 12), request("a", 24), request("a", 12), history("a")]
        );
    }

    #[test]
    fn scroll_step_is_at_least_one() {
        let mut h = Harness::new();
        let mut tiny = scene(&["a"]);
        tiny.terminals[0].rows = 1;
        h.store.apply_scene(tiny);

        h.store.scroll(&"a".into(), ScrollDirection::Up);
        assert_eq!(h.store.view(&"a".into()).unwrap().scrollback_offset, 1);
    }

    #[test]
    fn resize_requires_positive_dimensions() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));

        assert!(!h.store.resize_terminal(&"a".into(), 0, 30));
        assert!(h.sent().is_empty());

        assert!(h.store.resize_terminal(&"a".into(), 100, 30));
        let a = h.store.view(&"a".into()).unwrap();
        assert_eq!((a.cols, a.rows), (100, 30));
        assert_eq!(
            h.sent(),
            vec![ClientMessage::Resize {
                id: "a".into(),
                cols: 100,
                rows: 30
            }]
        );
    }

    #[test]
    fn font_size_is_clamped_and_persisted() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));

        h.store.update_font_size(&"a".into(), 200);
        assert_eq!(h.store.view(&"a".into()).unwrap().font_size, MAX_FONT_SIZE);
        h.store.update_font_size(&"a".into(), 2);
        assert_eq!(h.store.view(&"a".into()).unwrap().font_size, MIN_FONT_SIZE);
        assert_eq!(
            h.layouts.snapshot()[&SessionId::from("a")].font_size,
            Some(MIN_FONT_SIZE)
        );

        h.store.update_font_size(&"ghost".into(), 12);
        assert!(h.store.view(&"ghost".into()).is_none());
    }

    #[test]
    fn layouts_survive_a_dropped_connection() {
        let layouts = MemoryLayoutStore::new();
        let mut h = Harness::with_layouts(layouts.clone());
        h.store.apply_scene(scene(&["a"]));
        h.store
            .update_layout(&"a".into(), LayoutRect { x: 4, y: 1, w: 8, h: 6 });
        h.store.update_font_size(&"a".into(), 22);

        h.store.clear_views();
        h.store.set_outbox(Outbox::closed());
        assert!(h.store.is_empty());

        h.store.apply_scene(scene(&["a"]));
        let a = h.store.view(&"a".into()).unwrap();
        assert_eq!(a.layout, LayoutRect { x: 4, y: 1, w: 8, h: 6 });
        assert_eq!(a.font_size, 22);
    }

    #[test]
    fn sends_without_connection_report_false() {
        let mut store = ClientSyncStore::new(Box::new(MemoryLayoutStore::new()));
        assert!(!store.create_terminal());
        assert!(!store.send_input(&"a".into(), "ls"));
        assert!(!store.request_scene());

        let (tx, rx) = mpsc::unbounded_channel();
        store.set_outbox(Outbox::new(tx));
        assert!(store.close_terminal(&"a".into()));
        drop(rx);
        assert!(!store.create_terminal());
    }

    #[test]
    fn clear_drops_sinks_too() {
        let mut h = Harness::new();
        h.store.apply_scene(scene(&["a"]));
        h.sink("a");

        h.store.clear_views();
        assert!(h.store.has_sink(&"a".into()));
        h.store.clear();
        assert!(!h.store.has_sink(&"a".into()));
        assert!(!h.store.unregister_sink(&"a".into()));
    }
}
