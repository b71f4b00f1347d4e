//! Target identity extraction.
//!
//! Infers who an outreach action was aimed at from whatever the host page
//! happens to expose: the declared-intent label, a conversation header,
//! page headings, and nearby profile links. Every source is optional and
//! the result degrades to an empty name and the current page location.

use crate::classifier::INTENT_LABEL;
use crate::config::IdentityConfig;
use crate::dom::{DocumentView, NodeId, ROOT};
use lazy_static::lazy_static;
use outreach_store::OutreachKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

lazy_static! {
    // "invite dave payne to connect"
    static ref INVITE_LABEL: Regex = Regex::new(r"^invite (.+?) to connect$").unwrap();

    // "connect with alex ripoll piera"
    static ref CONNECT_WITH_LABEL: Regex = Regex::new(r"^connect with (.+)$").unwrap();
}

/// Classes carried by the conversation header in the messaging view
/// Conversation header signatures, most specific first: (tag, attribute, value)
const CONVERSATION_HEADERS: &[(Option<&str>, &str, &str)] = &[
    (Some("h2"), "class", "msg-entity-lockup__entity-title"),
    (None, "class", "msg-thread__link"),
    (None, "data-control-name", "conversation_title"),
];

/// Who an action targeted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name, empty when nothing usable was found
    pub name: String,
    /// Absolute profile or page reference
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    host_origin: String,
    profile_path_marker: String,
    max_depth: usize,
}

impl IdentityExtractor {
    pub fn new(config: &IdentityConfig, max_depth: usize) -> Self {
        Self {
            host_origin: config.host_origin.trim_end_matches('/').to_string(),
            profile_path_marker: config.profile_path_marker.clone(),
            max_depth,
        }
    }

    pub fn extract(&self, view: &DocumentView<'_>, el: NodeId, kind: OutreachKind) -> Identity {
        let name = self.resolve_name(view, el, kind);
        let url = self.resolve_url(view, el);
        debug!("Resolved identity for {}: name={:?} url={}", el, name, url);
        Identity { name, url }
    }

    fn resolve_name(&self, view: &DocumentView<'_>, el: NodeId, kind: OutreachKind) -> String {
        if let Some(name) = view.attribute(el, INTENT_LABEL).and_then(name_from_label) {
            return name;
        }

        if kind == OutreachKind::Message {
            if let Some(name) = conversation_header(view) {
                return name;
            }
        }

        page_heading(view).unwrap_or_default()
    }

    fn resolve_url(&self, view: &DocumentView<'_>, el: NodeId) -> String {
        let href = self
            .find_profile_link(view, el)
            .unwrap_or_else(|| view.location().to_string());
        self.absolutize(&href)
    }

    /// Walk up from `el`, checking each level and then its subtree
    fn find_profile_link(&self, view: &DocumentView<'_>, el: NodeId) -> Option<String> {
        let is_profile_link = |v: &DocumentView<'_>, n: NodeId| {
            v.tag(n) == Some("a")
                && v.attribute(n, "href")
                    .map_or(false, |href| href.contains(self.profile_path_marker.as_str()))
        };

        let levels = std::iter::once(el).chain(view.ancestors(el)).take(self.max_depth);
        for node in levels {
            if is_profile_link(view, node) {
                return view.attribute(node, "href").map(str::to_string);
            }
            if let Some(link) = view.find_descendant(node, is_profile_link) {
                trace!("Profile link {} found below {}", link, node);
                return view.attribute(link, "href").map(str::to_string);
            }
        }
        None
    }

    /// Rewrite root-relative references against the host origin
    fn absolutize(&self, href: &str) -> String {
        if !href.starts_with('/') || href.starts_with("//") {
            return href.to_string();
        }
        match Url::parse(&self.host_origin).and_then(|base| base.join(href)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.host_origin, href),
        }
    }
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new(&IdentityConfig::default(), 8)
    }
}

/// Name embedded in a declared-intent label, title-cased
pub fn name_from_label(label: &str) -> Option<String> {
    let lower = label.trim().to_lowercase();
    let captured = INVITE_LABEL
        .captures(&lower)
        .or_else(|| CONNECT_WITH_LABEL.captures(&lower))?
        .get(1)?
        .as_str();

    let name = title_case(captured);
    (!name.is_empty()).then_some(name)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty_text(view: &DocumentView<'_>, id: NodeId) -> Option<String> {
    let text = view.text_content(id);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Header of the open conversation. Signatures are tried in order and the
/// first one that matches anything decides.
fn conversation_header(view: &DocumentView<'_>) -> Option<String> {
    let all = view.descendants(ROOT);
    CONVERSATION_HEADERS
        .iter()
        .find_map(|&(tag, attr, value)| {
            all.iter().copied().find(|&n| {
                tag.map_or(view.is_element(n), |t| view.tag(n) == Some(t))
                    && if attr == "class" {
                        view.has_class(n, value)
                    } else {
                        view.attribute(n, attr) == Some(value)
                    }
            })
        })
        .and_then(|n| non_empty_text(view, n))
}

/// First heading in `main`, then in an open dialog, then anywhere
fn page_heading(view: &DocumentView<'_>) -> Option<String> {
    let all = view.descendants(ROOT);
    let is_heading = |n: NodeId, levels: &[&str]| {
        view.tag(n).map_or(false, |tag| levels.iter().any(|level| *level == tag))
    };
    let within = |n: NodeId, pred: &dyn Fn(NodeId) -> bool| view.closest(n, |_, a| pred(a)).is_some();

    let in_main = all
        .iter()
        .copied()
        .find(|&n| is_heading(n, &["h1"]) && within(n, &|a| view.tag(a) == Some("main")));
    if let Some(text) = in_main.and_then(|n| non_empty_text(view, n)) {
        return Some(text);
    }

    let in_dialog = all.iter().copied().find(|&n| {
        is_heading(n, &["h1", "h2"])
            && within(n, &|a| {
                view.tag(a) == Some("dialog") || view.attribute(a, "role") == Some("dialog")
            })
    });
    if let Some(text) = in_dialog.and_then(|n| non_empty_text(view, n)) {
        return Some(text);
    }

    all.iter()
        .copied()
        .find(|&n| is_heading(n, &["h1", "h2", "h3"]))
        .and_then(|n| non_empty_text(view, n))
}
