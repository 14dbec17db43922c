//! Rendering of change records into consumer payloads.
//!
//! The delivery path only sees [`LabeledRecord`]s, so a renderer never needs to
//! know which source a record came from.

use crate::models::{LabeledRecord, NewQueueItem, DEFAULT_ACTION};

/// Turns a labeled change record into the display string the consumer applies.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &LabeledRecord) -> String;
}

/// Markdown body preceded by a YAML-style frontmatter block.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterRenderer;

impl Renderer for FrontmatterRenderer {
    fn render(&self, record: &LabeledRecord) -> String {
        let mut out = String::from("---\n");

        out.push_str(&format!("collection: {}\n", record.collection));
        out.push_str(&format!("external_id: {}\n", record.id));
        out.push_str(&format!("verb: {}\n", record.verb));
        out.push_str(&format!("title: {}\n", clean_title(&record.title)));
        for (key, value) in &record.fields {
            out.push_str(&format!("{}: {}\n", key, single_line(value)));
        }

        out.push_str("---\n\n");
        out.push_str(&record.body);
        out
    }
}

/// Build the queue item for a change record.
pub fn queue_item_for(renderer: &dyn Renderer, record: &LabeledRecord) -> NewQueueItem {
    NewQueueItem {
        content: renderer.render(record),
        action: DEFAULT_ACTION.to_string(),
        collection: Some(record.collection.clone()),
        title: Some(record.title.clone()).filter(|t| !t.is_empty()),
    }
}

/// Strip characters that would break a frontmatter line.
fn clean_title(title: &str) -> String {
    title.replace(':', " -").replace('\n', " ").trim().to_string()
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
