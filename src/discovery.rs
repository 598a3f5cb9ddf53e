use crate::config::{ExportConfig, RegionType, VisibilitySettings};
use crate::dom::{Document, NodeData, NodeId, Selector};
use crate::ExportError;
use std::collections::HashSet;
use tracing::debug;

const HEADING_SELECTOR: &str = "h1,h2,h3,h4,h5,h6";
const HEADING_WRAPPER_CLASS: &str = "mw-heading";

/// A region of the host page that can be exported.
///
/// `element` is a key into the live document, not an owned node. `visible`
/// is the state seen at discovery time; callers re-check with
/// [`RegionDiscovery::is_visible`] before acting on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportableRegion {
    pub element: NodeId,
    pub region_type: RegionType,
    pub title: Option<String>,
    pub visible: bool,
}

/// Regions sharing the same nearest preceding heading.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingGroup {
    pub heading_text: String,
    pub heading_node: NodeId,
    /// Where a menu for this group is mounted: the heading, or its
    /// `.mw-heading` wrapper when present.
    pub anchor: NodeId,
    pub regions: Vec<ExportableRegion>,
}

/// Heading groups in first-seen order, keyed by heading text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredRegions {
    groups: Vec<HeadingGroup>,
}

impl DiscoveredRegions {
    pub fn get(&self, heading_text: &str) -> Option<&HeadingGroup> {
        self.groups.iter().find(|g| g.heading_text == heading_text)
    }

    fn entry(&mut self, heading_text: &str, heading_node: NodeId, anchor: NodeId) -> &mut HeadingGroup {
        let position = match self.groups.iter().position(|g| g.heading_text == heading_text) {
            Some(position) => position,
            None => {
                self.groups.push(HeadingGroup {
                    heading_text: heading_text.to_string(),
                    heading_node,
                    anchor,
                    regions: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[position]
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeadingGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn region_count(&self) -> usize {
        self.groups.iter().map(|g| g.regions.len()).sum()
    }

    pub fn into_vec(self) -> Vec<HeadingGroup> {
        self.groups
    }
}

struct CompiledPattern {
    selector: Selector,
    target: Option<Selector>,
    region_type: RegionType,
    title: Option<Selector>,
}

/// Scans a document for exportable regions.
pub struct RegionDiscovery {
    patterns: Vec<CompiledPattern>,
    heading: Selector,
    edit_affordance: Selector,
    headline: Selector,
    inactive_tab: Selector,
    visibility: VisibilitySettings,
}

impl RegionDiscovery {
    pub fn new(config: &ExportConfig) -> Result<Self, ExportError> {
        let patterns = config
            .regions
            .iter()
            .map(|pattern| {
                Ok(CompiledPattern {
                    selector: Selector::parse(&pattern.selector)?,
                    target: pattern
                        .target_selector
                        .as_deref()
                        .map(Selector::parse)
                        .transpose()?,
                    region_type: pattern.region_type,
                    title: pattern
                        .title_selector
                        .as_deref()
                        .map(Selector::parse)
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>, ExportError>>()?;

        Ok(Self {
            patterns,
            heading: Selector::parse(HEADING_SELECTOR)?,
            edit_affordance: Selector::parse(&config.headings.edit_affordance_selector)?,
            headline: Selector::parse(&config.headings.headline_selector)?,
            inactive_tab: Selector::parse(&config.visibility.inactive_tab_selector)?,
            visibility: config.visibility.clone(),
        })
    }

    /// Group every exportable region under its nearest preceding heading.
    pub fn find_exportable_elements(&self, document: &Document) -> DiscoveredRegions {
        let mut discovered = DiscoveredRegions::default();
        let mut claimed: HashSet<NodeId> = HashSet::new();

        for pattern in &self.patterns {
            for container in document.select_compiled(NodeId::ROOT, &pattern.selector) {
                let target = match &pattern.target {
                    Some(target) => document.select_compiled(container, target).into_iter().next(),
                    None => Some(container),
                };
                let Some(target) = target else {
                    debug!("Skipping {} region without capture target", pattern.region_type.label());
                    continue;
                };
                if !claimed.insert(target) {
                    debug!("Region target already claimed by an earlier pattern");
                    continue;
                }

                let Some((heading_node, heading_text)) = self.find_previous_heading(document, container)
                else {
                    debug!("Skipping {} region without a preceding heading", pattern.region_type.label());
                    continue;
                };

                let title = pattern
                    .title
                    .as_ref()
                    .and_then(|title| document.select_compiled(container, title).into_iter().next())
                    .map(|node| document.text_content(node).trim().to_string());

                let anchor = document
                    .parent_element(heading_node)
                    .filter(|p| document.has_class(*p, HEADING_WRAPPER_CLASS))
                    .unwrap_or(heading_node);

                let visible = self.is_visible(document, target);
                discovered
                    .entry(&heading_text, heading_node, anchor)
                    .regions
                    .push(ExportableRegion {
                        element: target,
                        region_type: pattern.region_type,
                        title,
                        visible,
                    });
            }
        }

        debug!(
            "Discovered {} regions under {} headings",
            discovered.region_count(),
            discovered.len()
        );
        discovered
    }

    /// Nearest heading before `start` in document order with non-empty text.
    pub fn find_previous_heading(&self, document: &Document, start: NodeId) -> Option<(NodeId, String)> {
        document
            .preceding_elements(start)
            .filter(|node| self.heading.matches(document, *node))
            .find_map(|node| {
                let text = self.extract_heading_text(document, node);
                (!text.is_empty()).then_some((node, text))
            })
    }

    /// Heading text with the first edit affordance removed, preferring the
    /// headline element when one exists.
    pub fn extract_heading_text(&self, document: &Document, heading: NodeId) -> String {
        let removed = document
            .select_compiled(heading, &self.edit_affordance)
            .into_iter()
            .next();
        let inside_removed = |node: NodeId| {
            removed.is_some_and(|r| node == r || document.ancestors(node).any(|a| a == r))
        };
        let source = document
            .select_compiled(heading, &self.headline)
            .into_iter()
            .find(|node| !inside_removed(*node))
            .unwrap_or(heading);

        let text: String = document
            .descendants(source)
            .into_iter()
            .filter(|node| !inside_removed(*node))
            .filter_map(|node| match document.data(node) {
                Some(NodeData::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        text.trim().to_string()
    }

    /// Whether the node is currently rendered. Evaluated against live state.
    pub fn is_visible(&self, document: &Document, node: NodeId) -> bool {
        if !document.is_connected(node) || !document.is_element(node) {
            return false;
        }
        if is_hidden(document, node) {
            return false;
        }

        let body = document.body();
        for ancestor in document.ancestors(node) {
            if Some(ancestor) == body {
                break;
            }
            if is_hidden(document, ancestor) {
                return false;
            }
            if self
                .visibility
                .collapsed_classes
                .iter()
                .any(|class| document.has_class(ancestor, class))
            {
                return false;
            }
            if document.attr(ancestor, &self.visibility.collapsible_state_attr) == Some("collapsed") {
                return false;
            }
            if self.inactive_tab.matches(document, ancestor) {
                return false;
            }
        }
        true
    }
}

fn is_hidden(document: &Document, node: NodeId) -> bool {
    document.display(node) == "none" || document.visibility(node) == "hidden"
}
