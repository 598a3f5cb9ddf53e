//! Per-heading export menu.
//!
//! The menu is rebuilt every time it opens, since regions may have been
//! collapsed, expanded or moved to another tab since discovery ran.

use crate::delivery::Notifier;
use crate::discovery::{ExportableRegion, HeadingGroup, RegionDiscovery};
use crate::dom::{self, NodeId};
use crate::export_service::{ExportMode, ExportOutcome, Exporter};
use crate::{notice_for, Notice};
use std::sync::Arc;
use tracing::debug;

/// One clickable entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuAction {
    pub label: String,
    pub mode: ExportMode,
    pub element: NodeId,
    /// Section title passed to the exporter.
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuState {
    /// Display scale changed since load; only a reload prompt is shown.
    ReloadRequired,
    /// Every region of the group is hidden right now.
    ContentNotVisible,
    Actions(Vec<MenuAction>),
}

impl MenuState {
    pub fn actions(&self) -> &[MenuAction] {
        match self {
            MenuState::Actions(actions) => actions,
            _ => &[],
        }
    }
}

/// Result of clicking an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Another export was running; the click did nothing.
    Ignored,
    /// The export finished and the menu closes.
    Completed(ExportOutcome),
    /// The export failed; the notice was shown and the menu stays open.
    Failed(Notice),
}

pub struct ExportMenu {
    exporter: Arc<Exporter>,
    discovery: Arc<RegionDiscovery>,
    notifier: Arc<dyn Notifier>,
}

impl ExportMenu {
    pub fn new(exporter: Arc<Exporter>, discovery: Arc<RegionDiscovery>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            exporter,
            discovery,
            notifier,
        }
    }

    pub fn populate(&self, group: &HeadingGroup) -> MenuState {
        if self.exporter.zoom_invalidated() {
            return MenuState::ReloadRequired;
        }

        let visible: Vec<&ExportableRegion> = {
            let document = dom::read(self.exporter.document());
            group
                .regions
                .iter()
                .filter(|region| self.discovery.is_visible(&document, region.element))
                .collect()
        };
        if visible.is_empty() {
            return MenuState::ContentNotVisible;
        }

        let single = visible.len() == 1;
        let mut actions = Vec::with_capacity(visible.len() * 2);
        for (index, region) in visible.iter().enumerate() {
            let subject = if single {
                None
            } else {
                Some(region_label(&visible, index))
            };
            let title = region
                .title
                .clone()
                .unwrap_or_else(|| group.heading_text.clone());

            actions.push(MenuAction {
                label: copy_label(subject.as_deref()),
                mode: ExportMode::Copy,
                element: region.element,
                title: title.clone(),
            });
            actions.push(MenuAction {
                label: download_label(subject.as_deref()),
                mode: ExportMode::Download,
                element: region.element,
                title,
            });
        }
        MenuState::Actions(actions)
    }

    pub async fn activate(&self, action: &MenuAction) -> Activation {
        if self.exporter.is_exporting() {
            debug!("Ignoring \"{}\" while an export is running", action.label);
            return Activation::Ignored;
        }

        match self.exporter.export(action.element, &action.title, action.mode).await {
            Ok(outcome) => {
                if let Some(notice) = outcome.notice() {
                    self.notifier.notify(&notice);
                }
                Activation::Completed(outcome)
            }
            Err(e) => {
                let notice = notice_for(&e);
                self.notifier.notify(&notice);
                Activation::Failed(notice)
            }
        }
    }
}

/// Name of a region among the visible ones: its title, else its type,
/// numbered when several untitled regions share that type.
pub fn region_label(visible: &[&ExportableRegion], index: usize) -> String {
    let region = visible[index];
    if let Some(title) = &region.title {
        return title.clone();
    }

    let untitled_same_type: Vec<usize> = visible
        .iter()
        .enumerate()
        .filter(|(_, r)| r.region_type == region.region_type && r.title.is_none())
        .map(|(i, _)| i)
        .collect();

    let type_name = region.region_type.label();
    if untitled_same_type.len() > 1 {
        let position = untitled_same_type
            .iter()
            .position(|&i| i == index)
            .unwrap_or(0);
        format!("{} {}", type_name, position + 1)
    } else {
        type_name.to_string()
    }
}

fn copy_label(subject: Option<&str>) -> String {
    match subject {
        Some(subject) => format!("Copy {} image to clipboard", subject),
        None => "Copy image to clipboard".to_string(),
    }
}

fn download_label(subject: Option<&str>) -> String {
    match subject {
        Some(subject) => format!("Download {} as image", subject),
        None => "Download as image".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionType;
    use crate::dom::Document;

    fn regions(doc: &Document, specs: &[(RegionType, Option<&str>)]) -> Vec<ExportableRegion> {
        let nodes = doc.select("div").unwrap();
        specs
            .iter()
            .zip(nodes)
            .map(|((region_type, title), element)| ExportableRegion {
                element,
                region_type: *region_type,
                title: title.map(str::to_string),
                visible: true,
            })
            .collect()
    }

    #[test]
    fn test_region_labels() {
        let doc = Document::parse("<body><div></div><div></div><div></div><div></div></body>");
        let all = regions(
            &doc,
            &[
                (RegionType::GroupTable, None),
                (RegionType::GroupTable, Some("Group B")),
                (RegionType::GroupTable, None),
                (RegionType::Bracket, None),
            ],
        );
        let refs: Vec<&ExportableRegion> = all.iter().collect();

        assert_eq!(region_label(&refs, 0), "Group Table 1");
        assert_eq!(region_label(&refs, 1), "Group B");
        assert_eq!(region_label(&refs, 2), "Group Table 2");
        assert_eq!(region_label(&refs, 3), "Bracket");
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(copy_label(None), "Copy image to clipboard");
        assert_eq!(download_label(None), "Download as image");
        assert_eq!(copy_label(Some("Bracket")), "Copy Bracket image to clipboard");
        assert_eq!(download_label(Some("Match List 2")), "Download Match List 2 as image");
    }
}
