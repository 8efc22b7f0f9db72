use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::assembler::BookDocument;
use crate::config::Config;
use crate::manifest::{fetch_package_manifest, PackageManifest, PageImage};
use crate::page::{fetch_page, PageError};
use crate::session::Session;
use crate::toc::{fetch_toc, flatten_toc};

/// Outcome of one attempted page, kept for the end-of-run summary.
#[derive(Debug)]
pub struct PageOutcome {
    pub index: usize,
    pub idref: String,
    pub error: Option<PageError>,
}

/// Collected per-page results: N attempted, K failed, N-K assembled.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub outcomes: Vec<PageOutcome>,
}

impl DownloadReport {
    fn record(&mut self, index: usize, idref: &str, error: Option<PageError>) {
        self.outcomes.push(PageOutcome {
            index,
            idref: idref.to_string(),
            error,
        });
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted() - self.failed()
    }
}

pub struct Downloader {
    config: Config,
}

impl Downloader {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs the whole pipeline: session, manifests, page loop, TOC, write.
    /// Returns the report so callers can inspect per-page outcomes.
    pub async fn run(&self) -> Result<DownloadReport> {
        let session = Session::from_cookie_file(&self.config.cookie_path).await?;
        let manifest = fetch_package_manifest(session.client(), &self.config).await?;

        info!("Book found: {}", manifest.book.title.green());
        info!("  author: {}", manifest.book.author);
        info!("  isbn:   {}", manifest.book.isbn);
        info!("  pages:  {}", manifest.book.pages);

        for idref in &manifest.skipped_refs {
            info!("Skipping non-page item: {}", idref.yellow());
        }

        let mut document = BookDocument::new();
        let report = self
            .download_pages(&session, &manifest, &mut document)
            .await;

        info!(
            "Assembled {} of {} pages ({} skipped)",
            report.succeeded().to_string().green(),
            report.attempted(),
            report.failed()
        );

        self.attach_toc(&session, &mut document).await;

        let filename = format!("{}.pdf", sanitize_filename(&manifest.book.title));
        let out_path = self.config.output_dir.join(filename);
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let page_count = document.page_count();
        document.save(&out_path).await?;
        info!(
            "Saved {} pages to {}",
            page_count,
            out_path.display().to_string().blue()
        );

        Ok(report)
    }

    /// Sequential fetch/assemble loop. Every failure is caught at the page
    /// boundary, logged and recorded; survivors keep their relative order.
    async fn download_pages(
        &self,
        session: &Session,
        manifest: &PackageManifest,
        document: &mut BookDocument,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();

        let bar = ProgressBar::new(manifest.page_refs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        for (index, idref) in manifest.page_refs.iter().enumerate() {
            bar.set_message(idref.clone());
            match self.download_page(session, manifest, document, idref).await {
                Ok(()) => report.record(index, idref, None),
                Err(e) => {
                    warn!("Skipping page {} ({}): {}", index + 1, idref, e);
                    report.record(index, idref, Some(e));
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        report
    }

    async fn download_page(
        &self,
        session: &Session,
        manifest: &PackageManifest,
        document: &mut BookDocument,
        idref: &str,
    ) -> Result<(), PageError> {
        let image = manifest
            .resolve_page(idref)
            .ok_or_else(|| PageError::Unresolved(idref.to_string()))?;
        let url = self.config.ops_url(image.href());
        let bytes = fetch_page(
            session.client(),
            &url,
            self.config.encryption_key.as_deref(),
        )
        .await?;

        match image {
            PageImage::Vector(_) => document
                .append_vector_page(&bytes)
                .map_err(|e| PageError::Assemble(e.to_string())),
            PageImage::Raster(_) => document
                .append_raster_page(bytes)
                .map_err(|e| PageError::Assemble(e.to_string())),
        }
    }

    /// TOC failures degrade the output (no outline) instead of aborting.
    async fn attach_toc(&self, session: &Session, document: &mut BookDocument) {
        match fetch_toc(session.client(), &self.config).await {
            Ok(sections) => {
                let entries = flatten_toc(&sections);
                if entries.is_empty() {
                    info!("TOC manifest is empty, writing without an outline");
                } else if document.page_count() == 0 {
                    warn!("No pages were assembled, skipping TOC attachment");
                } else {
                    info!("Attaching TOC with {} entries", entries.len());
                    document.set_toc(&entries);
                }
            }
            Err(e) => warn!("Could not build TOC, continuing without it: {}", e),
        }
    }
}

/// Replaces filesystem-hostile characters in a title with underscores.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}
