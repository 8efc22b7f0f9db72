use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, xobject, Bookmark, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

use crate::toc::TocEntry;

/// The output document under construction. Pages are appended in encounter
/// order and never reordered or removed.
pub struct BookDocument {
    doc: Document,
    /// Reserved id of the page-tree root; the dictionary itself is written
    /// at save time once the final Kids list is known.
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl BookDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Converts an SVG payload (plain or gzip-compressed) to a one-page PDF
    /// and merges that page, preserving the graphic's intrinsic dimensions.
    pub fn append_vector_page(&mut self, svg: &[u8]) -> Result<()> {
        let options = svg2pdf::usvg::Options::default();
        let tree = svg2pdf::usvg::Tree::from_data(svg, &options)
            .map_err(|e| anyhow!("failed to parse SVG payload: {e}"))?;
        let pdf = svg2pdf::to_pdf(
            &tree,
            svg2pdf::ConversionOptions::default(),
            svg2pdf::PageOptions::default(),
        )
        .map_err(|e| anyhow!("failed to convert SVG page to PDF: {e}"))?;

        self.merge_single_page_pdf(&pdf)
    }

    /// Decodes a raster payload and places it full-bleed on a new page whose
    /// MediaBox exactly matches the image's pixel dimensions.
    pub fn append_raster_page(&mut self, data: Vec<u8>) -> Result<()> {
        let (width, height) = image::load_from_memory(&data)
            .context("failed to decode raster payload")?
            .dimensions();
        let (w, h) = (width as i64, height as i64);

        let image_stream =
            xobject::image_from(data).context("failed to embed image in the document")?;
        let image_id = self.doc.add_object(image_stream);
        let image_name = format!("Im{}", image_id.0);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        w.into(),
                        0.into(),
                        0.into(),
                        h.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(image_name.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self.doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("failed to encode page content")?,
        ));
        let resources_id = self.doc.add_object(dictionary! {
            "XObject" => dictionary! {
                image_name.as_str() => Object::Reference(image_id),
            },
        });
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
        });
        self.page_ids.push(page_id);

        Ok(())
    }

    /// Merges every page of an already-rendered PDF into this document.
    /// Object ids are renumbered past our own and the pages reparented onto
    /// our page tree.
    fn merge_single_page_pdf(&mut self, data: &[u8]) -> Result<()> {
        let mut imported =
            Document::load_mem(data).context("failed to load converted vector page")?;
        imported.renumber_objects_with(self.doc.max_id + 1);
        self.doc.max_id = imported.max_id;

        let pages = imported.get_pages();
        for (object_id, object) in std::mem::take(&mut imported.objects) {
            self.doc.objects.insert(object_id, object);
        }
        for (_, page_id) in pages {
            if let Ok(Object::Dictionary(ref mut page)) = self.doc.get_object_mut(page_id) {
                page.set("Parent", Object::Reference(self.pages_id));
            }
            self.page_ids.push(page_id);
        }

        Ok(())
    }

    /// Records the outline. Does nothing when there are no entries or no
    /// pages; an empty outline must never be attached. Entry page numbers
    /// are clamped into the range of assembled pages.
    pub fn set_toc(&mut self, entries: &[TocEntry]) {
        if entries.is_empty() || self.page_ids.is_empty() {
            debug!("Skipping TOC attachment: nothing to attach to");
            return;
        }

        let mut current_section: Option<u32> = None;
        for entry in entries {
            let index = (entry.page.max(1) as usize).min(self.page_ids.len()) - 1;
            let bookmark = Bookmark::new(entry.title.clone(), [0.0, 0.0, 0.0], 0, self.page_ids[index]);
            if entry.depth <= 1 {
                current_section = Some(self.doc.add_bookmark(bookmark, None));
            } else {
                self.doc.add_bookmark(bookmark, current_section);
            }
        }
    }

    /// Serializes the document to `path`.
    ///
    /// The primary pass prunes unused objects, renumbers and compresses
    /// streams; if it fails, one retry without compression is attempted.
    /// A second failure propagates.
    pub async fn save(mut self, path: &Path) -> Result<()> {
        self.finalize();

        let data = match self.serialize(true) {
            Ok(data) => data,
            Err(e) => {
                warn!("Primary serialization failed ({e}), retrying without stream compression");
                self.serialize(false)
                    .context("fallback serialization also failed")?
            }
        };

        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("failed to write PDF to {}", path.display()))?;

        Ok(())
    }

    /// Writes the page tree root, the catalog and the outline.
    fn finalize(&mut self) {
        let kids: Vec<Object> = self
            .page_ids
            .iter()
            .map(|id| Object::Reference(*id))
            .collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(self.pages_id),
        });
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        if let Some(outline_id) = self.doc.build_outline() {
            if let Ok(Object::Dictionary(ref mut catalog)) = self.doc.get_object_mut(catalog_id) {
                catalog.set("Outlines", Object::Reference(outline_id));
            }
        }
    }

    fn serialize(&self, compress: bool) -> Result<Vec<u8>> {
        let mut doc = self.doc.clone();
        doc.prune_objects();
        if compress {
            doc.renumber_objects();
            doc.compress();
        }
        let mut data = Vec::new();
        doc.save_to(&mut data)
            .context("failed to serialize document")?;
        Ok(data)
    }
}

impl Default for BookDocument {
    fn default() -> Self {
        Self::new()
    }
}
