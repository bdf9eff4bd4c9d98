//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex};

use ctrkit::node::NodeTree;
use ctrkit::source::ByteRange;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Events recorded while a closure ran under [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedLogs {
    /// Messages at WARN or ERROR.
    pub fn problems(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level <= Level::WARN)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

struct Capture(CapturedLogs);

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = Message(String::new());
        event.record(&mut message);
        self.0
            .0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}

struct Message(String);

impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Run `f` with a subscriber recording every event on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = Registry::default().with(Capture(logs.clone()));
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, logs)
}

pub fn leaf(bytes: &[u8]) -> ByteRange {
    ByteRange::from_vec(bytes.to_vec())
}

/// A tree exercising nesting, empty directories, sizes around the 0x10
/// alignment and non-ASCII names.
pub fn sample_tree() -> NodeTree {
    let mut tree = NodeTree::new();
    let root = tree.root();
    tree.add_leaf(root, "readme.txt", leaf(b"hello romfs")).unwrap();
    tree.add_leaf(root, "empty.bin", leaf(b"")).unwrap();

    let data = tree.add_container(root, "data").unwrap();
    tree.add_leaf(data, "sixteen.bin", leaf(&[0x10; 16])).unwrap();
    tree.add_leaf(data, "seventeen.bin", leaf(&[0x11; 17])).unwrap();
    let deep = tree.add_container(data, "deep").unwrap();
    let deeper = tree.add_container(deep, "deeper").unwrap();
    let big: Vec<u8> = (0..0x3456u32).map(|i| (i % 251) as u8).collect();
    tree.add_leaf(deeper, "big.bin", ByteRange::from_vec(big)).unwrap();

    tree.add_container(root, "empty_dir").unwrap();
    let text = tree.add_container(root, "テキスト").unwrap();
    tree.add_leaf(text, "日本語.msg", leaf("こんにちは".as_bytes()))
        .unwrap();
    tree
}

/// `(path, contents)` of every leaf and `(path, None)` of every container,
/// in breadth-first order.
pub fn listing(tree: &NodeTree) -> Vec<(String, Option<Vec<u8>>)> {
    tree.iter_breadth_first(tree.root())
        .map(|(id, node)| {
            let data = node.data().map(|d| d.to_vec().unwrap());
            (tree.path(id), data)
        })
        .collect()
}
