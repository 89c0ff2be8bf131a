//! Target Resolution: structural address or ephemeral id → live node.

use crate::agent::locator::ElementRegistry;
use crate::agent::types::{Target, TargetRef};
use crate::error::{AgentError, Result};
use crate::host::{ElementFacts, NodeHandle, PageHost};

/// A node that resolved and is still attached
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub node: NodeHandle,
    pub address: String,
    pub facts: ElementFacts,
}

pub async fn resolve_target(
    host: &dyn PageHost,
    registry: &ElementRegistry,
    target: &Target,
) -> Result<ResolvedTarget> {
    let (address, element_id) = match target.to_ref()? {
        TargetRef::Address(address) => (address, None),
        TargetRef::ElementId(id) => match registry.address_of(&id) {
            Some(address) => (address.to_string(), Some(id)),
            None => return Err(AgentError::StaleElementId(id)),
        },
    };

    let not_found = |detail: Option<String>| match (&element_id, detail) {
        (Some(id), _) => AgentError::StaleElementId(format!("{} ({})", id, address)),
        (None, Some(detail)) => AgentError::TargetNotFound(format!("{}: {}", address, detail)),
        (None, None) => AgentError::TargetNotFound(address.clone()),
    };

    let node = match host.query(&address).await {
        Ok(Some(node)) => node,
        Ok(None) => return Err(not_found(None)),
        Err(e) => return Err(not_found(Some(e.to_string()))),
    };
    let facts = host.describe(node).await?.ok_or_else(|| not_found(None))?;

    Ok(ResolvedTarget {
        node,
        address,
        facts,
    })
}

/// Short human-readable name for messages, e.g. `button "Sign in"`
pub fn describe_element(facts: &ElementFacts, label: &str) -> String {
    let mut name = facts.tag.clone();
    if let Some(id) = &facts.id {
        name.push('#');
        name.push_str(id);
    }
    if label.is_empty() {
        name
    } else {
        format!("{} \"{}\"", name, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ElementSpec, MemoryPage};

    fn page() -> (MemoryPage, NodeHandle) {
        let page = MemoryPage::new("https://example.com", "t", 800.0, 600.0);
        let button = page.append(
            page.body(),
            ElementSpec::new("button").id("go").text("Go").rect(0.0, 0.0, 50.0, 20.0),
        );
        (page, button)
    }

    #[tokio::test]
    async fn test_resolves_address() {
        let (page, button) = page();
        let registry = ElementRegistry::new();
        let resolved = resolve_target(&page, &registry, &Target::Reference("#go".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.node, button);
        assert_eq!(resolved.facts.tag, "button");
    }

    #[tokio::test]
    async fn test_resolves_ephemeral_id_through_registry() {
        let (page, button) = page();
        let mut registry = ElementRegistry::new();
        registry.insert("e_1".to_string(), "#go".to_string());
        let resolved = resolve_target(&page, &registry, &Target::Reference("e_1".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.node, button);
        assert_eq!(resolved.address, "#go");
    }

    #[tokio::test]
    async fn test_unknown_and_stale_ids_fail_cleanly() {
        let (page, button) = page();
        let mut registry = ElementRegistry::new();
        let err = resolve_target(&page, &registry, &Target::Reference("e_9".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StaleElementId(_)));

        registry.insert("e_1".to_string(), "#go".to_string());
        page.remove(button);
        let err = resolve_target(&page, &registry, &Target::Reference("e_1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StaleElementId(_)));
    }

    #[tokio::test]
    async fn test_missing_and_invalid_addresses() {
        let (page, _) = page();
        let registry = ElementRegistry::new();
        let err = resolve_target(&page, &registry, &Target::Reference("#nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TargetNotFound(_)));

        let err = resolve_target(&page, &registry, &Target::Reference("div >".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TargetNotFound(_)));
    }

    #[test]
    fn test_describe_element() {
        let facts = ElementFacts {
            tag: "button".to_string(),
            id: Some("go".to_string()),
            ..Default::default()
        };
        assert_eq!(describe_element(&facts, "Go"), "button#go \"Go\"");
        assert_eq!(describe_element(&facts, ""), "button#go");
    }
}
