use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use kitaboo2pdf::{fetch_toc, flatten_toc, Config, Downloader, Session, DEFAULT_BASE_URL};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "kitaboo2pdf")]
#[command(about = "CLI utility to download a licensed Kitaboo e-book and rebuild it as a single PDF")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an e-book and assemble its pages into a single PDF
    Download {
        /// Identifier of the e-book on the content server
        ebook_id: String,

        /// File holding one line of raw browser cookie text
        #[arg(short = 'c', long = "cookies", default_value = "cookies.txt")]
        cookies: PathBuf,

        /// Secret used to decrypt encrypted page payloads (16 characters)
        #[arg(short = 'k', long = "key")]
        key: Option<String>,

        /// Content-server base URL
        #[arg(long = "base-url", default_value = DEFAULT_BASE_URL)]
        base_url: Url,

        /// Directory used to save the assembled PDF
        #[arg(short = 'o', long = "outDir", default_value = ".")]
        out_dir: PathBuf,
    },
    /// Fetch and print the table of contents without downloading pages
    Toc {
        /// Identifier of the e-book on the content server
        ebook_id: String,

        /// File holding one line of raw browser cookie text
        #[arg(short = 'c', long = "cookies", default_value = "cookies.txt")]
        cookies: PathBuf,

        /// Content-server base URL
        #[arg(long = "base-url", default_value = DEFAULT_BASE_URL)]
        base_url: Url,
    },
}

async fn print_toc(config: &Config) -> Result<()> {
    let session = Session::from_cookie_file(&config.cookie_path).await?;
    let sections = fetch_toc(session.client(), config).await?;
    let entries = flatten_toc(&sections);

    if entries.is_empty() {
        info!("No table of contents found.");
        return Ok(());
    }

    for entry in entries {
        let indent = "  ".repeat(entry.depth as usize - 1);
        println!("{}{} (p. {})", indent, entry.title, entry.page);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("kitaboo2pdf=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Download {
            ebook_id,
            cookies,
            key,
            base_url,
            out_dir,
        } => {
            let config = Config {
                base_url,
                ebook_id,
                cookie_path: cookies,
                encryption_key: key,
                output_dir: out_dir,
            };
            Downloader::new(config).run().await.map(|_| ())
        }
        Commands::Toc {
            ebook_id,
            cookies,
            base_url,
        } => {
            let config = Config {
                base_url,
                ebook_id,
                cookie_path: cookies,
                encryption_key: None,
                output_dir: PathBuf::from("."),
            };
            print_toc(&config).await
        }
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
