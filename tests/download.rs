//! End-to-end pipeline tests against a mock content server.

use std::path::PathBuf;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use kitaboo2pdf::{Config, Downloader};
use lopdf::Document;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

const EBOOK_ID: &str = "680165";
const KEY: &str = "0123456789abcdef";

const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Mock Book: Vol 1/2</dc:title>
    <dc:author>A. Writer</dc:author>
    <dc:description>Fixture book</dc:description>
    <dc:identifier>urn:isbn:9780190999999</dc:identifier>
  </metadata>
  <manifest>
    <item id="imagespage0001svgz" href="images/page0001.svgz" media-type="image/svg+xml"/>
    <item id="imagespage0002png" href="images/page0002.png" media-type="image/png"/>
    <item id="imagespage0003jpg" href="images/page0003.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="cover"/>
    <itemref idref="page0001"/>
    <itemref idref="page0002"/>
    <itemref idref="page0003"/>
    <itemref idref="page0004"/>
  </spine>
</package>"#;

const TOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<toc>
  <node id="3" title="Chapter 1">
    <node id="page0002" title="Section 1.1"/>
  </node>
</toc>"#;

const SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="150">
  <rect x="0" y="0" width="100" height="150" fill="teal"/>
</svg>"#;

fn ops(resource: &str) -> String {
    format!("/{EBOOK_ID}/html5/{EBOOK_ID}/OPS/{resource}")
}

/// Base64 ciphertext the way the server produces it: AES-128-CBC with the
/// secret doubling as IV, padded to the block size with 0x0F bytes.
fn encrypt_like_server(plaintext: &[u8]) -> String {
    let mut padded = plaintext.to_vec();
    while padded.len() % 16 != 0 {
        padded.push(0x0F);
    }
    let cipher = Aes128CbcEnc::new_from_slices(KEY.as_bytes(), KEY.as_bytes()).unwrap();
    BASE64.encode(cipher.encrypt_padded_vec_mut::<NoPadding>(&padded))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 10]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 10, 120]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

async fn mock_pages(server: &MockServer) {
    // page0001 is served encrypted, the other two in the clear.
    Mock::given(method("GET"))
        .and(path(ops("images/page0001.svgz")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Amz-Server-Side-Encryption", "AES256")
                .set_body_string(encrypt_like_server(SVG.as_bytes())),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(ops("images/page0002.png")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(40, 60)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(ops("images/page0003.jpg")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes(30, 30)))
        .mount(server)
        .await;
}

async fn config_for(server: &MockServer) -> (Config, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cookie_path = dir.path().join("cookies.txt");
    tokio::fs::write(&cookie_path, "JSESSIONID=test-session; AWSALB=lb\n")
        .await
        .unwrap();

    let config = Config {
        base_url: Url::parse(&server.uri()).unwrap(),
        ebook_id: EBOOK_ID.to_string(),
        cookie_path,
        encryption_key: Some(KEY.to_string()),
        output_dir: dir.path().to_path_buf(),
    };
    (config, dir)
}

fn output_path(dir: &tempfile::TempDir) -> PathBuf {
    // Title "Mock Book: Vol 1/2" with invalid characters replaced.
    dir.path().join("Mock Book_ Vol 1_2.pdf")
}

#[tokio::test]
async fn downloads_and_assembles_the_whole_book() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ops("content.opf")))
        .respond_with(ResponseTemplate::new(200).set_body_string(OPF))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ops("toc.xml")))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOC))
        .mount(&server)
        .await;
    mock_pages(&server).await;

    let (config, dir) = config_for(&server).await;
    let report = Downloader::new(config).run().await.unwrap();

    // 4 page refs attempted ("cover" excluded); page0004 has no image item.
    assert_eq!(report.attempted(), 4);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 3);

    let doc = Document::load(output_path(&dir)).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
    assert!(doc.catalog().unwrap().get(b"Outlines").is_ok());
}

#[tokio::test]
async fn toc_failure_degrades_to_a_document_without_outline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ops("content.opf")))
        .respond_with(ResponseTemplate::new(200).set_body_string(OPF))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ops("toc.xml")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mock_pages(&server).await;

    let (config, dir) = config_for(&server).await;
    let report = Downloader::new(config).run().await.unwrap();
    assert_eq!(report.succeeded(), 3);

    let doc = Document::load(output_path(&dir)).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
    assert!(doc.catalog().unwrap().get(b"Outlines").is_err());
}

#[tokio::test]
async fn package_manifest_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ops("content.opf")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (config, _dir) = config_for(&server).await;
    assert!(Downloader::new(config).run().await.is_err());
}

#[tokio::test]
async fn encrypted_page_without_key_is_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ops("content.opf")))
        .respond_with(ResponseTemplate::new(200).set_body_string(OPF))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ops("toc.xml")))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOC))
        .mount(&server)
        .await;
    mock_pages(&server).await;

    let (mut config, dir) = config_for(&server).await;
    config.encryption_key = None;

    let report = Downloader::new(config).run().await.unwrap();
    // The encrypted vector page and the unresolvable ref both fail.
    assert_eq!(report.failed(), 2);
    assert_eq!(report.succeeded(), 2);

    let doc = Document::load(output_path(&dir)).unwrap();
    assert_eq!(doc.get_pages().len(), 2);
}
