use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use tracing::debug;

use crate::config::Config;

/// Media types admitted into the item table. Everything else in the manifest
/// (stylesheets, fonts, HTML wrappers) is irrelevant to page resolution.
const IMAGE_MEDIA_TYPES: [&str; 3] = ["image/svg+xml", "image/png", "image/jpeg"];

/// Bibliographic identity of the book, parsed once from the package manifest.
#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub description: String,
    /// Highest page-number suffix among `page`-prefixed spine references.
    pub pages: usize,
}

/// A resolved page image reference, tagged with how it must be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageImage {
    /// Scalable graphic, converted to a one-page document and merged.
    Vector(String),
    /// Pixel image, placed full-bleed on a page sized to the image.
    Raster(String),
}

impl PageImage {
    pub fn href(&self) -> &str {
        match self {
            PageImage::Vector(href) | PageImage::Raster(href) => href,
        }
    }
}

/// Parsed package manifest: book identity, item table and page order.
#[derive(Debug)]
pub struct PackageManifest {
    pub book: Book,
    /// item id -> href, restricted to image media types.
    items: HashMap<String, String>,
    /// Spine references prefixed `page`, in document order. This order is
    /// the final output page order.
    pub page_refs: Vec<String>,
    /// Spine references without the `page` prefix; excluded but reported.
    pub skipped_refs: Vec<String>,
}

impl PackageManifest {
    /// Maps a page reference id (e.g. `page0007`) to a concrete image href.
    ///
    /// Candidate item ids are tried in a fixed priority order: the vector
    /// form first, then the two raster forms. Returns `None` when no image
    /// item matches; the caller skips the page.
    pub fn resolve_page(&self, idref: &str) -> Option<PageImage> {
        if let Some(href) = self.items.get(&format!("images{idref}svgz")) {
            return Some(PageImage::Vector(href.clone()));
        }
        for suffix in ["png", "jpg"] {
            if let Some(href) = self.items.get(&format!("images{idref}{suffix}")) {
                return Some(PageImage::Raster(href.clone()));
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Fetches and parses the package manifest. Failure here is fatal to the
/// run: without it there is no book identity and no page list.
pub async fn fetch_package_manifest(client: &Client, config: &Config) -> Result<PackageManifest> {
    let url = config.package_manifest_url();
    let content = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("failed to fetch package manifest from {url}"))?
        .text()
        .await
        .context("failed to read package manifest body")?;

    parse_package_manifest(&content)
}

/// Metadata element currently being captured.
enum Field {
    Title,
    Author,
    Description,
    Identifier,
}

/// Parses the OPF-style package markup.
pub fn parse_package_manifest(content: &str) -> Result<PackageManifest> {
    // Text is trimmed once per field at its end tag; trimming individual
    // fragments would eat the spaces around entity references.
    let mut reader = Reader::from_str(content);

    let mut title: Option<String> = None;
    let mut author = String::new();
    let mut description = String::new();
    let mut identifier: Option<String> = None;

    let mut items: HashMap<String, String> = HashMap::new();
    let mut page_refs: Vec<String> = Vec::new();
    let mut skipped_refs: Vec<String> = Vec::new();

    let mut current: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                match local_name(e.name().as_ref()) {
                    b"title" => current = Some(Field::Title),
                    b"author" | b"creator" => current = Some(Field::Author),
                    b"description" => current = Some(Field::Description),
                    b"identifier" => current = Some(Field::Identifier),
                    b"item" => collect_item(&e, &mut items),
                    b"itemref" => collect_itemref(&e, &mut page_refs, &mut skipped_refs),
                    _ => {}
                }
                if current.is_some() {
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => match local_name(e.name().as_ref()) {
                b"item" => collect_item(&e, &mut items),
                b"itemref" => collect_itemref(&e, &mut page_refs, &mut skipped_refs),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current.is_some() {
                    if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                        text.push_str(resolved);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(field) = current.take() {
                    let value = text.trim().to_string();
                    match field {
                        Field::Title => title = Some(value),
                        Field::Author => {
                            if author.is_empty() {
                                author = value;
                            }
                        }
                        Field::Description => description = value,
                        Field::Identifier => {
                            if identifier.is_none() {
                                identifier = Some(value);
                            }
                        }
                    }
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("malformed package manifest: {e}")),
            _ => {}
        }
    }

    let title = title.context("package manifest has no title")?;
    let identifier = identifier.context("package manifest has no identifier")?;
    // The identifier field is composite (`urn:isbn:<digits>`); the ISBN is
    // its third colon-delimited segment.
    let isbn = identifier
        .split(':')
        .nth(2)
        .with_context(|| format!("identifier {identifier:?} has no ISBN segment"))?
        .to_string();

    let pages = page_refs
        .iter()
        .filter_map(|idref| idref.strip_prefix("page"))
        .filter_map(|suffix| suffix.parse::<usize>().ok())
        .max()
        .unwrap_or(0);

    debug!(
        "Parsed package manifest: {} image items, {} page refs, {} skipped refs",
        items.len(),
        page_refs.len(),
        skipped_refs.len()
    );

    Ok(PackageManifest {
        book: Book {
            title,
            author,
            isbn,
            description,
            pages,
        },
        items,
        page_refs,
        skipped_refs,
    })
}

fn collect_item(e: &BytesStart, items: &mut HashMap<String, String>) {
    let id = attr_value(e, b"id");
    let href = attr_value(e, b"href");
    let media_type = attr_value(e, b"media-type");
    if let (Some(id), Some(href), Some(media_type)) = (id, href, media_type) {
        if IMAGE_MEDIA_TYPES.contains(&media_type.as_str()) {
            items.insert(id, href);
        }
    }
}

fn collect_itemref(e: &BytesStart, page_refs: &mut Vec<String>, skipped_refs: &mut Vec<String>) {
    if let Some(idref) = attr_value(e, b"idref") {
        if idref.starts_with("page") {
            page_refs.push(idref);
        } else {
            skipped_refs.push(idref);
        }
    }
}

pub(crate) fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Strips any namespace prefix from an element name.
pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

pub(crate) fn resolve_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    }
}
