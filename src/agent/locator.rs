//! Element Locator: discovery, filtering, reading-order ranking, structural
//! addresses and display labels for interactive elements.

use crate::agent::types::{ElementDescriptor, ElementKind, IntRect};
use crate::config::LocatorConfig;
use crate::error::Result;
use crate::host::selector::escape_ident;
use crate::host::{ElementFacts, PageHost};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Ephemeral id → structural address, rebuilt by every snapshot.
#[derive(Debug, Default)]
pub struct ElementRegistry {
    entries: HashMap<String, String>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, id: String, address: String) {
        self.entries.insert(id, address);
    }

    pub fn address_of(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Locator {
    config: LocatorConfig,
}

impl Locator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Enumerate, filter and rank interactive elements, then repopulate `registry`.
    pub async fn locate(
        &self,
        host: &dyn PageHost,
        registry: &mut ElementRegistry,
    ) -> Result<Vec<ElementDescriptor>> {
        let discovered = host.interactive_elements().await?;
        let total = discovered.len();
        let actionable: Vec<ElementFacts> = discovered
            .into_iter()
            .filter(|facts| self.is_actionable(facts))
            .collect();
        let ranked = self.rank(actionable);

        registry.clear();
        let mut descriptors = Vec::with_capacity(ranked.len().min(self.config.max_elements));
        for facts in ranked {
            if descriptors.len() >= self.config.max_elements {
                break;
            }
            let Some(address) = self.address(&facts) else {
                continue;
            };
            let id = format!("e_{}", descriptors.len() + 1);
            registry.insert(id.clone(), address.clone());
            descriptors.push(self.describe(id, address, &facts));
        }

        tracing::debug!(
            "Located {} of {} interactive elements",
            descriptors.len(),
            total
        );
        Ok(descriptors)
    }

    /// Large enough to hit, rendered, visible and enabled
    pub fn is_actionable(&self, facts: &ElementFacts) -> bool {
        let min = self.config.min_size_px;
        if facts.rect.width < min || facts.rect.height < min {
            return false;
        }
        let style = &facts.style;
        if style.display == "none" {
            return false;
        }
        if style.visibility == "hidden" || style.visibility == "collapse" {
            return false;
        }
        if style.opacity <= 0.0 {
            return false;
        }
        !facts.disabled
    }

    /// Reading order: rows top to bottom, left to right inside a row.
    ///
    /// Elements whose tops lie within `row_tolerance_px` of the first element
    /// of a row share that row, so sub-pixel jitter never reorders a row.
    pub fn rank(&self, mut elements: Vec<ElementFacts>) -> Vec<ElementFacts> {
        elements.sort_by(|a, b| by_position(a.rect.y, a.rect.x, b.rect.y, b.rect.x));

        let mut ranked = Vec::with_capacity(elements.len());
        let mut row: Vec<ElementFacts> = Vec::new();
        let mut row_top = f64::NEG_INFINITY;
        for facts in elements {
            if !row.is_empty() && facts.rect.y - row_top > self.config.row_tolerance_px {
                flush_row(&mut row, &mut ranked);
            }
            if row.is_empty() {
                row_top = facts.rect.y;
            }
            row.push(facts);
        }
        flush_row(&mut row, &mut ranked);
        ranked
    }

    /// Structural address, or `None` when the element has no ancestry to describe.
    pub fn address(&self, facts: &ElementFacts) -> Option<String> {
        if let Some(id) = facts.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Some(format!("#{}", escape_ident(id)));
        }

        let mut parts = Vec::new();
        for (depth, segment) in facts.ancestry.iter().enumerate() {
            if depth >= self.config.max_address_depth {
                break;
            }
            if depth > 0 {
                if let Some(id) = segment.id.as_deref().filter(|id| !id.trim().is_empty()) {
                    parts.push(format!("#{}", escape_ident(id)));
                    break;
                }
            }
            if segment.tag.is_empty() {
                return None;
            }
            let mut part = segment.tag.clone();
            for class in segment.classes.iter().take(self.config.max_classes) {
                part.push('.');
                part.push_str(&escape_ident(class));
            }
            if segment.same_tag_count > 1 {
                part.push_str(&format!(":nth-of-type({})", segment.same_tag_index));
            }
            parts.push(part);
        }

        if parts.is_empty() {
            return None;
        }
        parts.reverse();
        Some(parts.join(" > "))
    }

    /// Human-readable name, for display only
    pub fn label(&self, facts: &ElementFacts) -> String {
        let candidates = [
            facts.aria_label.as_deref(),
            facts.labelled_by_text.as_deref(),
            facts.placeholder.as_deref(),
            facts.value.as_deref(),
            Some(facts.text.as_str()),
            facts.name.as_deref(),
            facts.title.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .map(collapse_whitespace)
            .find(|s| !s.is_empty())
            .map(|s| truncate_chars(&s, self.config.label_max_chars))
            .unwrap_or_default()
    }

    fn describe(&self, id: String, address: String, facts: &ElementFacts) -> ElementDescriptor {
        let clip = |s: &Option<String>| {
            s.as_deref()
                .map(|v| truncate_chars(&collapse_whitespace(v), self.config.label_max_chars))
                .filter(|v| !v.is_empty())
        };
        ElementDescriptor {
            id,
            selector: address,
            tag: facts.tag.clone(),
            kind: element_kind(facts),
            label: self.label(facts),
            text: truncate_chars(&collapse_whitespace(&facts.text), self.config.text_max_chars),
            placeholder: clip(&facts.placeholder),
            aria_label: clip(&facts.aria_label),
            rect: IntRect::from(facts.rect),
        }
    }
}

fn by_position(ay: f64, ax: f64, by: f64, bx: f64) -> Ordering {
    ay.total_cmp(&by).then(ax.total_cmp(&bx))
}

fn flush_row(row: &mut Vec<ElementFacts>, out: &mut Vec<ElementFacts>) {
    row.sort_by(|a, b| by_position(a.rect.x, a.rect.y, b.rect.x, b.rect.y));
    out.append(row);
}

pub fn element_kind(facts: &ElementFacts) -> ElementKind {
    let role = facts.role.as_deref().unwrap_or("");
    match facts.tag.as_str() {
        "a" => return ElementKind::Link,
        "button" => return ElementKind::Button,
        "select" => return ElementKind::Select,
        "textarea" => return ElementKind::Textarea,
        "input" => {
            return match facts.input_type.as_deref().unwrap_or("text") {
                "button" | "submit" | "reset" | "image" => ElementKind::Button,
                "checkbox" => ElementKind::Checkbox,
                "radio" => ElementKind::Radio,
                "file" => ElementKind::File,
                _ => ElementKind::TextInput,
            }
        }
        _ => {}
    }
    if facts.content_editable {
        return ElementKind::ContentEditable;
    }
    match role {
        "button" => ElementKind::Button,
        "link" => ElementKind::Link,
        _ => ElementKind::Generic,
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ComputedStyle, NodeHandle, PathSegment, Rect};

    fn locator() -> Locator {
        Locator::new(LocatorConfig::default())
    }

    fn facts_at(handle: u64, x: f64, y: f64) -> ElementFacts {
        ElementFacts {
            handle: NodeHandle(handle),
            tag: "button".to_string(),
            rect: Rect::new(x, y, 40.0, 20.0),
            style: ComputedStyle::default(),
            has_native_click: true,
            ..Default::default()
        }
    }

    fn segment(tag: &str, id: Option<&str>, classes: &[&str], index: usize, count: usize) -> PathSegment {
        PathSegment {
            tag: tag.to_string(),
            id: id.map(|s| s.to_string()),
            classes: classes.iter().map(|s| s.to_string()).collect(),
            same_tag_index: index,
            same_tag_count: count,
        }
    }

    // ------------------------------------------------------------------
    // Filtering
    // ------------------------------------------------------------------

    #[test]
    fn test_filters_tiny_hidden_and_disabled() {
        let locator = locator();
        assert!(locator.is_actionable(&facts_at(1, 0.0, 0.0)));

        let mut tiny = facts_at(1, 0.0, 0.0);
        tiny.rect.width = 2.0;
        assert!(!locator.is_actionable(&tiny));

        let mut hidden = facts_at(1, 0.0, 0.0);
        hidden.style.visibility = "hidden".to_string();
        assert!(!locator.is_actionable(&hidden));

        let mut transparent = facts_at(1, 0.0, 0.0);
        transparent.style.opacity = 0.0;
        assert!(!locator.is_actionable(&transparent));

        let mut disabled = facts_at(1, 0.0, 0.0);
        disabled.disabled = true;
        assert!(!locator.is_actionable(&disabled));
    }

    // ------------------------------------------------------------------
    // Ranking
    // ------------------------------------------------------------------

    #[test]
    fn test_rank_keeps_jittered_row_left_to_right() {
        let elements = vec![
            facts_at(1, 300.0, 100.0),
            facts_at(2, 10.0, 103.5),
            facts_at(3, 150.0, 99.2),
            facts_at(4, 10.0, 40.0),
            facts_at(5, 10.0, 200.0),
        ];
        let ranked: Vec<u64> = locator()
            .rank(elements)
            .into_iter()
            .map(|f| f.handle.0)
            .collect();
        assert_eq!(ranked, vec![4, 2, 3, 1, 5]);
    }

    #[test]
    fn test_rank_separates_rows_beyond_tolerance() {
        let elements = vec![facts_at(1, 500.0, 0.0), facts_at(2, 0.0, 9.0)];
        let ranked: Vec<u64> = locator()
            .rank(elements)
            .into_iter()
            .map(|f| f.handle.0)
            .collect();
        assert_eq!(ranked, vec![1, 2]);
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    #[test]
    fn test_address_prefers_own_id() {
        let mut facts = facts_at(1, 0.0, 0.0);
        facts.id = Some("submit".to_string());
        facts.ancestry = vec![segment("button", Some("submit"), &[], 1, 1)];
        assert_eq!(locator().address(&facts).as_deref(), Some("#submit"));

        facts.id = Some("1st".to_string());
        assert_eq!(locator().address(&facts).as_deref(), Some("#\\31 st"));
    }

    #[test]
    fn test_address_walks_to_ancestor_id() {
        let mut facts = facts_at(1, 0.0, 0.0);
        facts.ancestry = vec![
            segment("button", None, &["btn", "md:primary", "extra"], 2, 3),
            segment("div", None, &["toolbar"], 1, 1),
            segment("form", Some("checkout"), &[], 1, 1),
            segment("body", None, &[], 1, 1),
        ];
        assert_eq!(
            locator().address(&facts).as_deref(),
            Some("#checkout > div.toolbar > button.btn.md\\:primary:nth-of-type(2)")
        );
    }

    #[test]
    fn test_address_depth_is_bounded() {
        let mut facts = facts_at(1, 0.0, 0.0);
        facts.ancestry = (0..10).map(|_| segment("div", None, &[], 1, 1)).collect();
        let address = locator().address(&facts).unwrap();
        assert_eq!(address.split(" > ").count(), 6);

        facts.ancestry.clear();
        assert!(locator().address(&facts).is_none());
    }

    // ------------------------------------------------------------------
    // Labels and kinds
    // ------------------------------------------------------------------

    #[test]
    fn test_label_priority_and_truncation() {
        let mut facts = facts_at(1, 0.0, 0.0);
        facts.text = "  Sign \n in  ".to_string();
        facts.name = Some("signin".to_string());
        assert_eq!(locator().label(&facts), "Sign in");

        facts.placeholder = Some("Email".to_string());
        assert_eq!(locator().label(&facts), "Email");

        facts.aria_label = Some("   ".to_string());
        facts.labelled_by_text = Some("Your email".to_string());
        assert_eq!(locator().label(&facts), "Your email");

        facts.aria_label = Some("x".repeat(200));
        assert_eq!(locator().label(&facts).chars().count(), 80);
    }

    #[test]
    fn test_element_kinds() {
        let mut facts = facts_at(1, 0.0, 0.0);
        facts.tag = "input".to_string();
        facts.input_type = Some("email".to_string());
        assert_eq!(element_kind(&facts), ElementKind::TextInput);
        facts.input_type = Some("submit".to_string());
        assert_eq!(element_kind(&facts), ElementKind::Button);

        facts.tag = "div".to_string();
        facts.content_editable = true;
        assert_eq!(element_kind(&facts), ElementKind::ContentEditable);

        facts.content_editable = false;
        facts.role = Some("link".to_string());
        assert_eq!(element_kind(&facts), ElementKind::Link);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
