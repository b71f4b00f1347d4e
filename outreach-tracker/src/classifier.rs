//! Click classification.
//!
//! Decides whether an interactive element is one of the tracked outreach
//! actions. Runs on every click, so it only reads a handful of attributes
//! and never walks far from the element.

use crate::config::ClassifierConfig;
use crate::dom::{DocumentView, NodeId};
use outreach_store::OutreachKind;
use tracing::trace;

/// Attribute carrying the declared-intent label
pub const INTENT_LABEL: &str = "aria-label";

/// Classifies clicked elements by their declared intent and visible text
#[derive(Debug, Clone)]
pub struct ElementClassifier {
    connect_keyword: String,
    send_labels: Vec<String>,
    send_button_classes: Vec<String>,
}

impl ElementClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            connect_keyword: config.connect_keyword.to_lowercase(),
            send_labels: config
                .send_labels
                .iter()
                .map(|label| label.trim().to_lowercase())
                .collect(),
            send_button_classes: config.send_button_classes.clone(),
        }
    }

    /// Which outreach action `el` performs, if any
    ///
    /// Precedence: declared-intent label, send-button class signature,
    /// then visible text of the element and its first inline child.
    pub fn classify(&self, view: &DocumentView<'_>, el: NodeId) -> Option<OutreachKind> {
        let label = view
            .attribute(el, INTENT_LABEL)
            .map(|l| l.trim().to_lowercase())
            .unwrap_or_default();

        if !label.is_empty() {
            if (label.contains("invite") && label.contains("to connect"))
                || label.starts_with("connect with")
            {
                trace!("{} classified as connect by label {:?}", el, label);
                return Some(OutreachKind::Connect);
            }
            if self.send_labels.iter().any(|send| *send == label) {
                trace!("{} classified as message by label {:?}", el, label);
                return Some(OutreachKind::Message);
            }
        }

        if self
            .send_button_classes
            .iter()
            .any(|class| view.has_class(el, class))
        {
            trace!("{} classified as message by class", el);
            return Some(OutreachKind::Message);
        }

        if self.connect_keyword.is_empty() {
            return None;
        }

        let text = view.text_content(el).trim().to_lowercase();
        let inner_text = view
            .find_descendant(el, |v, n| matches!(v.tag(n), Some("span") | Some("div")))
            .map(|inner| view.text_content(inner).trim().to_lowercase())
            .unwrap_or_default();

        if text.contains(&self.connect_keyword) || inner_text.contains(&self.connect_keyword) {
            trace!("{} classified as connect by text {:?}", el, text);
            return Some(OutreachKind::Connect);
        }

        None
    }
}

impl Default for ElementClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

/// Nearest clickable ancestor of a click target: a `button` or anything
/// declaring `role="button"`
pub fn interactive_ancestor(view: &DocumentView<'_>, target: NodeId) -> Option<NodeId> {
    view.closest(target, |v, n| {
        v.tag(n) == Some("button") || v.attribute(n, "role") == Some("button")
    })
}
