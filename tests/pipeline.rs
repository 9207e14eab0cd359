//! Orchestrator integration tests with fake collaborators.
//!
//! No network, no Tesseract and no pdfium: every external stage is replaced
//! by an in-process fake so the control flow, cleanup and error
//! classification can be checked deterministically.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use receipt_intake::pipeline::llm::Structurer;
use receipt_intake::pipeline::lookup::ReceiptLookup;
use receipt_intake::pipeline::ocr::{OcrEngine, OcrWord};
use receipt_intake::pipeline::orient::AssumeUpright;
use receipt_intake::pipeline::qr::QrDecoder;
use receipt_intake::pipeline::tables::{DetectedTable, TableDetector};
use receipt_intake::{
    BoundingBox, Components, IngestConfig, IngestError, Ingestor, OutcomeSource, QrError,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeQr(Option<&'static str>);

impl QrDecoder for FakeQr {
    fn decode(&self, _: &DynamicImage) -> Result<Option<String>, String> {
        Ok(self.0.map(str::to_string))
    }
}

struct FakeLookup {
    answer: Value,
    calls: AtomicUsize,
}

#[async_trait]
impl ReceiptLookup for FakeLookup {
    async fn lookup(&self, _: &str) -> Result<Value, QrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

struct FakeOcr {
    words: Result<Vec<OcrWord>, String>,
    calls: AtomicUsize,
}

impl OcrEngine for FakeOcr {
    fn recognize(&self, _: &Path) -> Result<Vec<OcrWord>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.words.clone().map_err(|detail| IngestError::OcrFailed { detail })
    }
}

/// Signals when `decode` starts, then blocks until released.
struct GatedQr {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl QrDecoder for GatedQr {
    fn decode(&self, _: &DynamicImage) -> Result<Option<String>, String> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(10));
        Ok(None)
    }
}

struct NoTables;

impl TableDetector for NoTables {
    fn detect(&self, _: &RgbImage, _: &[OcrWord]) -> Result<Vec<DetectedTable>, IngestError> {
        Ok(Vec::new())
    }
}

/// Reports one fixed table wherever it is asked to look.
struct FixedTable(DetectedTable);

impl TableDetector for FixedTable {
    fn detect(&self, _: &RgbImage, _: &[OcrWord]) -> Result<Vec<DetectedTable>, IngestError> {
        Ok(vec![self.0.clone()])
    }
}

struct FakeLlm {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Structurer for FakeLlm {
    async fn complete(&self, instruction: &str) -> Result<String, IngestError> {
        self.prompts.lock().unwrap().push(instruction.to_string());
        Ok(self.answer.clone())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    work_dir: tempfile::TempDir,
    lookup: Arc<FakeLookup>,
    ocr: Arc<FakeOcr>,
    llm: Arc<FakeLlm>,
    ingestor: Arc<Ingestor>,
}

struct Setup {
    qr: Option<&'static str>,
    decoder: Option<Arc<dyn QrDecoder>>,
    lookup_answer: Value,
    words: Result<Vec<OcrWord>, String>,
    tables: Arc<dyn TableDetector>,
    llm_answer: &'static str,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            qr: None,
            decoder: None,
            lookup_answer: Value::Null,
            words: Ok(Vec::new()),
            tables: Arc::new(NoTables),
            llm_answer: r#"{"totals": {"total": 45.0}}"#,
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let work_dir = tempfile::tempdir().unwrap();
    let lookup = Arc::new(FakeLookup {
        answer: setup.lookup_answer,
        calls: AtomicUsize::new(0),
    });
    let ocr = Arc::new(FakeOcr {
        words: setup.words,
        calls: AtomicUsize::new(0),
    });
    let llm = Arc::new(FakeLlm {
        answer: setup.llm_answer.to_string(),
        prompts: Mutex::new(Vec::new()),
    });
    // The bare placeholder makes the instruction exactly the extraction JSON.
    let config = IngestConfig::builder()
        .work_dir(work_dir.path())
        .system_template("{data}")
        .build()
        .unwrap();
    let components = Components {
        qr: setup.decoder.unwrap_or_else(|| Arc::new(FakeQr(setup.qr))),
        lookup: lookup.clone(),
        ocr: ocr.clone(),
        orientation: Arc::new(AssumeUpright),
        tables: setup.tables,
        structurer: llm.clone(),
    };
    Harness {
        ingestor: Arc::new(Ingestor::with_components(config, components)),
        work_dir,
        lookup,
        ocr,
        llm,
    }
}

impl Harness {
    fn leftovers(&self) -> usize {
        std::fs::read_dir(self.work_dir.path()).unwrap().count()
    }
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, image::Luma([255])))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn word(text: &str, x1: u32, y1: u32, x2: u32, y2: u32) -> OcrWord {
    OcrWord {
        text: text.to_string(),
        bbox: BoundingBox::new(x1, y1, x2, y2),
        confidence: 92.0,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_extension_is_rejected_before_any_io() {
    let root = tempfile::tempdir().unwrap();
    let work_dir = root.path().join("never-created");
    let config = IngestConfig::builder().work_dir(&work_dir).build().unwrap();
    let h = harness(Setup::default());
    let ingestor = Ingestor::with_components(
        config,
        Components {
            qr: Arc::new(FakeQr(Some("unused"))),
            lookup: h.lookup.clone(),
            ocr: h.ocr.clone(),
            orientation: Arc::new(AssumeUpright),
            tables: Arc::new(NoTables),
            structurer: h.llm.clone(),
        },
    );

    for name in ["receipt.gif", "receipt", "archive.pdf.zip"] {
        let err = ingestor.ingest(name, b"whatever").await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType { .. }), "{name}");
        assert!(err.is_client_error());
    }
    let err = ingestor.ingest("", b"whatever").await.unwrap_err();
    assert!(matches!(err, IngestError::MissingFileName));

    assert!(!work_dir.exists());
    assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn qr_hit_returns_lookup_response_and_skips_ocr() {
    let receipt = json!({"code": 1, "data": {"json": {"totalSum": 4500, "user": "ООО Ромашка"}}});
    let h = harness(Setup {
        qr: Some("t=20240115T1342&s=45.00&fn=9999078900004312&i=1&fp=1&n=1"),
        lookup_answer: receipt.clone(),
        ..Setup::default()
    });

    let outcome = h.ingestor.ingest("receipt.JPG", &png_bytes()).await.unwrap();

    assert_eq!(outcome.source, OutcomeSource::QrLookup);
    assert_eq!(outcome.body, receipt);
    assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
    assert!(h.llm.prompts.lock().unwrap().is_empty());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn empty_lookup_response_falls_back_to_ocr() {
    let h = harness(Setup {
        qr: Some("t=1"),
        lookup_answer: json!({}),
        ..Setup::default()
    });

    let outcome = h.ingestor.ingest("receipt.png", &png_bytes()).await.unwrap();

    assert_eq!(outcome.source, OutcomeSource::OcrLlm);
    assert_eq!(outcome.body, json!({"totals": {"total": 45.0}}));
    assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn image_with_table_is_structured_from_its_rows() {
    let h = harness(Setup {
        words: Ok(vec![
            word("Хлеб", 40, 40, 100, 60),
            word("45.00", 300, 40, 360, 60),
            word("Молоко", 40, 70, 120, 90),
            word("89.90", 300, 70, 360, 90),
            word("Спасибо", 40, 130, 120, 150),
            word("за", 125, 130, 145, 150),
            word("покупку", 150, 130, 240, 150),
        ]),
        tables: Arc::new(FixedTable(DetectedTable {
            bbox: BoundingBox::new(30, 30, 370, 100),
            rows: vec![
                vec![Some("Хлеб".into()), Some("45.00".into())],
                vec![Some("Молоко".into()), Some("89.90".into())],
            ],
        })),
        llm_answer: "```json\n{\"items\": [{\"name\": \"Хлеб\", \"sum\": 45.0}, {\"name\": \"Молоко\", \"sum\": 89.9}]}\n```",
        ..Setup::default()
    });

    let outcome = h.ingestor.ingest("photo.png", &png_bytes()).await.unwrap();
    assert_eq!(outcome.source, OutcomeSource::OcrLlm);
    assert_eq!(outcome.body["items"][1]["name"], "Молоко");

    let prompts = h.llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    let extracted: Value = serde_json::from_str(&prompts[0]).unwrap();
    assert_eq!(
        extracted["tables"],
        json!([{
            "table_index": 0,
            "data": [{"0": "Хлеб", "1": "45.00"}, {"0": "Молоко", "1": "89.90"}]
        }])
    );
    let text: Vec<&str> = extracted["text"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, vec!["Спасибо", "за", "покупку"]);
    assert!(extracted["text"][0].get("page").is_none());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn ocr_failure_is_server_error_and_cleans_up() {
    let h = harness(Setup {
        words: Err("tesseract: command not found".into()),
        ..Setup::default()
    });

    let err = h.ingestor.ingest("scan.jpeg", &png_bytes()).await.unwrap_err();
    assert!(matches!(err, IngestError::OcrFailed { .. }));
    assert!(!err.is_client_error());
    assert!(h.llm.prompts.lock().unwrap().is_empty());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn malformed_model_output_is_client_error_and_cleans_up() {
    let h = harness(Setup {
        llm_answer: "The receipt total is 45 rubles.",
        ..Setup::default()
    });

    let err = h.ingestor.ingest("scan.png", &png_bytes()).await.unwrap_err();
    assert!(matches!(err, IngestError::MalformedModelOutput { .. }));
    assert!(err.is_client_error());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn undecodable_upload_is_client_error() {
    let h = harness(Setup::default());
    let err = h.ingestor.ingest("scan.png", b"\x89PNG but not really").await.unwrap_err();
    assert!(matches!(err, IngestError::UndecodableImage { .. }));
    assert!(err.is_client_error());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn concurrent_uploads_with_the_same_name_do_not_collide() {
    let h = harness(Setup::default());
    let bytes = png_bytes();

    let (a, b, c) = tokio::join!(
        h.ingestor.ingest("receipt.png", &bytes),
        h.ingestor.ingest("receipt.png", &bytes),
        h.ingestor.ingest("receipt.png", &bytes),
    );
    for outcome in [a, b, c] {
        assert_eq!(outcome.unwrap().source, OutcomeSource::OcrLlm);
    }
    assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn path_components_in_upload_name_are_stripped() {
    let h = harness(Setup::default());
    let outcome = h
        .ingestor
        .ingest("../../etc/receipt.png", &png_bytes())
        .await
        .unwrap();
    assert_eq!(outcome.source, OutcomeSource::OcrLlm);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn ingest_path_reads_local_files() {
    let h = harness(Setup::default());
    let dir = tempfile::tempdir().unwrap();

    let err = h
        .ingestor
        .ingest_path(dir.path().join("missing.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::FileNotFound { .. }));

    let path = dir.path().join("receipt.png");
    std::fs::write(&path, png_bytes()).unwrap();
    let outcome = h.ingestor.ingest_path(&path).await.unwrap();
    assert_eq!(outcome.body, json!({"totals": {"total": 45.0}}));
    assert!(path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_request_leaves_no_workspace() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let h = harness(Setup {
        decoder: Some(Arc::new(GatedQr {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        })),
        ..Setup::default()
    });

    let ingestor = Arc::clone(&h.ingestor);
    let bytes = png_bytes();
    let request = tokio::spawn(async move { ingestor.ingest("receipt.png", &bytes).await });

    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("decoder was never reached");
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    // The decoder still holds the workspace; nothing may be pulled from under it.
    assert_eq!(h.leftovers(), 1);

    release_tx.send(()).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.leftovers() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.leftovers(), 0);
    assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
}
