use anyhow::{anyhow, Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;

use crate::config::Config;
use crate::manifest::{attr_value, local_name};

/// Top-level TOC node. The source manifest is modeled as exactly two levels:
/// sections and their direct children. Deeper nesting is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocSection {
    pub title: String,
    pub page: i64,
    pub children: Vec<TocItem>,
}

/// A section's direct child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocItem {
    pub title: String,
    pub page: i64,
}

/// One flattened outline entry: depth is 1 or 2, page is always >= 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub depth: u32,
    pub title: String,
    pub page: u32,
}

/// Fetches and parses the TOC manifest. Failure here degrades the run (the
/// document is written without an outline) rather than aborting it.
pub async fn fetch_toc(client: &Client, config: &Config) -> Result<Vec<TocSection>> {
    let url = config.toc_manifest_url();
    let content = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("failed to fetch TOC manifest from {url}"))?
        .text()
        .await
        .context("failed to read TOC manifest body")?;

    parse_toc(&content)
}

/// Parses nested `<node id=".." title="..">` markup into the two-level tree.
pub fn parse_toc(content: &str) -> Result<Vec<TocSection>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut sections: Vec<TocSection> = Vec::new();
    // Nesting depth inside <toc>; 1 = section, 2 = child, deeper = ignored.
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if local_name(e.name().as_ref()) == b"node" => {
                depth += 1;
                record_node(&e, depth, &mut sections);
            }
            Ok(Event::Empty(e)) if local_name(e.name().as_ref()) == b"node" => {
                record_node(&e, depth + 1, &mut sections);
            }
            Ok(Event::End(e)) if local_name(e.name().as_ref()) == b"node" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("malformed TOC manifest: {e}")),
            _ => {}
        }
    }

    Ok(sections)
}

fn record_node(e: &quick_xml::events::BytesStart, depth: usize, sections: &mut Vec<TocSection>) {
    let Some(title) = attr_value(e, b"title") else {
        return;
    };
    let page = node_page(&attr_value(e, b"id").unwrap_or_default());

    match depth {
        1 => sections.push(TocSection {
            title,
            page,
            children: Vec::new(),
        }),
        2 => {
            if let Some(section) = sections.last_mut() {
                section.children.push(TocItem { title, page });
            }
        }
        _ => {}
    }
}

/// Coerces a node id into a page number. Ids containing any alphabetic
/// character cannot be page numbers and map to 1; so does anything that
/// fails to parse as an integer.
fn node_page(id: &str) -> i64 {
    if id.chars().any(|c| c.is_alphabetic()) {
        return 1;
    }
    id.parse().unwrap_or(1)
}

/// Depth-first flatten: one depth-1 entry per section, immediately followed
/// by one depth-2 entry per direct child, in encounter order. Page numbers
/// are clamped to a minimum of 1.
pub fn flatten_toc(sections: &[TocSection]) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    for section in sections {
        entries.push(TocEntry {
            depth: 1,
            title: section.title.clone(),
            page: section.page.max(1) as u32,
        });
        for child in &section.children {
            entries.push(TocEntry {
                depth: 2,
                title: child.title.clone(),
                page: child.page.max(1) as u32,
            });
        }
    }
    entries
}
