//! Page Snapshotter.

use crate::agent::locator::{collapse_whitespace, truncate_chars, ElementRegistry, Locator};
use crate::agent::types::{now_ms, ElementDescriptor, PageState, ScrollState, Viewport};
use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::host::{PageGeometry, PageHost};

#[derive(Debug, Clone)]
pub struct Snapshotter {
    config: SnapshotConfig,
    locator: Locator,
}

impl Snapshotter {
    pub fn new(config: SnapshotConfig, locator: Locator) -> Self {
        Self { config, locator }
    }

    /// Build a fresh [`PageState`]; the registry is repopulated as a side effect.
    pub async fn capture(
        &self,
        host: &dyn PageHost,
        registry: &mut ElementRegistry,
    ) -> Result<PageState> {
        let url = host.url().await?;
        let title = host.title().await?;
        let geometry = host.geometry().await?;
        let elements = self.locator.locate(host, registry).await?;
        let text_snippet = text_snippet(&host.visible_text().await?, self.config.text_snippet_chars);
        let dom_signature = dom_signature(
            &url,
            &title,
            &text_snippet,
            &elements,
            self.config.signature_text_chars,
        );

        tracing::debug!(
            "Snapshot of {}: {} elements, signature {}",
            url,
            elements.len(),
            dom_signature
        );

        Ok(PageState {
            url,
            title,
            viewport: Viewport {
                width: geometry.viewport_width,
                height: geometry.viewport_height,
            },
            scroll: scroll_state(&geometry, self.config.edge_tolerance_px),
            elements,
            text_snippet,
            dom_signature,
            timestamp: now_ms(),
        })
    }
}

pub fn scroll_state(geometry: &PageGeometry, tolerance: f64) -> ScrollState {
    let max_y = geometry.max_scroll_y();
    ScrollState {
        x: geometry.scroll_x,
        y: geometry.scroll_y,
        max_y,
        at_top: geometry.scroll_y <= tolerance,
        at_bottom: geometry.scroll_y >= max_y - tolerance,
    }
}

/// Visible text on one whitespace-normalized line, bounded to `max_chars`
pub fn text_snippet(raw: &str, max_chars: usize) -> String {
    truncate_chars(&collapse_whitespace(raw), max_chars)
}

/// Base-33 rolling hash (djb2 seed) folded to 32 bits, as 8 hex digits.
///
/// Covers url, title, a prefix of the snippet and `id:tag:kind:label` of
/// every element. A change fingerprint, not an integrity check.
pub fn dom_signature(
    url: &str,
    title: &str,
    snippet: &str,
    elements: &[ElementDescriptor],
    text_chars: usize,
) -> String {
    let element_part = elements
        .iter()
        .map(|e| format!("{}:{}:{}:{}", e.id, e.tag, e.kind.as_str(), e.label))
        .collect::<Vec<_>>()
        .join(";");
    let input = format!(
        "{}|{}|{}|{}",
        url,
        title,
        truncate_chars(snippet, text_chars),
        element_part
    );

    let hash = input
        .chars()
        .fold(5381u32, |h, c| h.wrapping_mul(33).wrapping_add(c as u32));
    format!("{:08x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ElementKind, IntRect};

    fn descriptor(id: &str, label: &str) -> ElementDescriptor {
        ElementDescriptor {
            id: id.to_string(),
            selector: format!("#{}", id),
            tag: "button".to_string(),
            kind: ElementKind::Button,
            label: label.to_string(),
            text: label.to_string(),
            placeholder: None,
            aria_label: None,
            rect: IntRect::default(),
        }
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let elements = vec![descriptor("e_1", "Go")];
        let a = dom_signature("https://a/", "A", "hello", &elements, 600);
        let b = dom_signature("https://a/", "A", "hello", &elements, 600);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_tracks_each_input() {
        let elements = vec![descriptor("e_1", "Go")];
        let base = dom_signature("https://a/", "A", "hello", &elements, 600);
        assert_ne!(base, dom_signature("https://b/", "A", "hello", &elements, 600));
        assert_ne!(base, dom_signature("https://a/", "B", "hello", &elements, 600));
        assert_ne!(base, dom_signature("https://a/", "A", "hullo", &elements, 600));
        assert_ne!(
            base,
            dom_signature("https://a/", "A", "hello", &[descriptor("e_1", "Stop")], 600)
        );
        assert_ne!(base, dom_signature("https://a/", "A", "hello", &[], 600));
    }

    #[test]
    fn test_signature_ignores_text_past_prefix() {
        let a = dom_signature("u", "t", "abcdef", &[], 3);
        let b = dom_signature("u", "t", "abcxyz", &[], 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_signature_matches_djb2_seed_chain() {
        // "|||" hashed from 5381
        let expected = [b'|', b'|', b'|']
            .iter()
            .fold(5381u32, |h, &c| h.wrapping_mul(33).wrapping_add(c as u32));
        assert_eq!(dom_signature("", "", "", &[], 600), format!("{:08x}", expected));
    }

    #[test]
    fn test_text_snippet_collapses_and_bounds() {
        assert_eq!(text_snippet("  a \n\n b\t c ", 1600), "a b c");
        assert_eq!(text_snippet(&"word ".repeat(1000), 1600).chars().count(), 1600);
    }

    #[test]
    fn test_scroll_edges_use_tolerance() {
        let mut geometry = PageGeometry {
            viewport_width: 1000.0,
            viewport_height: 800.0,
            scroll_x: 0.0,
            scroll_y: 1.5,
            scroll_height: 3000.0,
        };
        let state = scroll_state(&geometry, 2.0);
        assert!(state.at_top);
        assert!(!state.at_bottom);
        assert_eq!(state.max_y, 2200.0);

        geometry.scroll_y = 2198.6;
        let state = scroll_state(&geometry, 2.0);
        assert!(!state.at_top);
        assert!(state.at_bottom);
    }
}
