//! Configuration types for receipt ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. One struct holds the knobs of every stage so
//! a single value can be shared by the HTTP server, the CLI and tests.

use crate::error::IngestError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default receipt-verification endpoint.
pub const DEFAULT_LOOKUP_URL: &str = "https://proverkacheka.com/api/v1/check/get";

/// Environment variable holding the verification service token.
pub const API_TOKEN_ENV: &str = "API_TOKEN";

/// Directory the default model paths are resolved against.
pub const DEFAULT_MODEL_DIR: &str = "models";

/// Configuration for the ingestion pipeline.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt_intake::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .api_token("secret")
///     .min_confidence(60)
///     .model("deepseek-v3")
///     .build()
///     .unwrap();
/// assert_eq!(config.min_confidence, 60);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Parent directory of the per-request workspaces. Default: the system temp dir.
    pub work_dir: PathBuf,

    /// Rendering DPI for PDF pages sent to OCR. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Maximum rendered page dimension in pixels. Default: 4000.
    ///
    /// Caps memory on oversized pages independently of `dpi`.
    pub max_rendered_pixels: u32,

    /// Directory containing the pdfium shared library. If None, the system
    /// library is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Path to the tesseract binary. Default: "tesseract" (resolved on PATH).
    pub tesseract_path: String,

    /// Tesseract language string. Default: "rus+eng".
    pub ocr_languages: String,

    /// Tesseract page segmentation mode. Default: 1 (automatic with OSD).
    pub ocr_psm: u8,

    /// Minimum word confidence (0–100) for words placed into table cells. Default: 50.
    pub min_confidence: u8,

    /// Layout detection model used to locate tables on a page.
    /// Default: `models/pp-doclayout_plus-l.onnx`.
    pub layout_model: PathBuf,

    /// Architecture of `layout_model`, as oar-ocr names it. Default: "pp_doclayout_plus_l".
    pub layout_model_name: String,

    /// SLANet table-structure model. Default: `models/slanet_plus.onnx`.
    pub table_structure_model: PathBuf,

    /// Structure token dictionary for `table_structure_model`.
    /// Default: `models/table_structure_dict_ch.txt`.
    pub table_structure_dict: PathBuf,

    /// Minimum score for table regions and structure tokens (0–1). Default: 0.5.
    pub table_score_threshold: f32,

    /// Document orientation classifier. If None, pages are assumed upright
    /// (EXIF orientation of photos is still applied).
    /// Default: `models/pp-lcnet_x1_0_doc_ori.onnx`.
    pub orientation_model: Option<PathBuf>,

    /// Receipt-verification endpoint.
    pub lookup_url: String,

    /// Token sent with every lookup request.
    pub api_token: Option<String>,

    /// Per-lookup HTTP timeout in seconds. Default: 30.
    pub lookup_timeout_secs: u64,

    /// LLM provider name (e.g. "openai", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// LLM model identifier. Default: "deepseek-v3".
    pub model: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the structuring call. Default: 0.55.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_tokens: usize,

    /// Instruction template; `{data}` is replaced with the extracted JSON.
    /// If None, uses [`crate::prompts::DEFAULT_SYSTEM_TEMPLATE`].
    pub system_template: Option<String>,

    /// Maximum accepted upload size in bytes. Default: 25 MiB.
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            dpi: 200,
            max_rendered_pixels: 4000,
            pdfium_lib_path: None,
            tesseract_path: "tesseract".to_string(),
            ocr_languages: "rus+eng".to_string(),
            ocr_psm: 1,
            min_confidence: 50,
            layout_model: model_path("pp-doclayout_plus-l.onnx"),
            layout_model_name: "pp_doclayout_plus_l".to_string(),
            table_structure_model: model_path("slanet_plus.onnx"),
            table_structure_dict: model_path("table_structure_dict_ch.txt"),
            table_score_threshold: 0.5,
            orientation_model: Some(model_path("pp-lcnet_x1_0_doc_ori.onnx")),
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            api_token: None,
            lookup_timeout_secs: 30,
            provider_name: None,
            model: Some("deepseek-v3".to_string()),
            provider: None,
            temperature: 0.55,
            max_tokens: 4096,
            system_template: None,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

fn model_path(file: &str) -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_DIR).join(file)
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("work_dir", &self.work_dir)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("tesseract_path", &self.tesseract_path)
            .field("ocr_languages", &self.ocr_languages)
            .field("ocr_psm", &self.ocr_psm)
            .field("min_confidence", &self.min_confidence)
            .field("layout_model", &self.layout_model)
            .field("layout_model_name", &self.layout_model_name)
            .field("table_structure_model", &self.table_structure_model)
            .field("table_structure_dict", &self.table_structure_dict)
            .field("table_score_threshold", &self.table_score_threshold)
            .field("orientation_model", &self.orientation_model)
            .field("lookup_url", &self.lookup_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("lookup_timeout_secs", &self.lookup_timeout_secs)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults plus the lookup token from `API_TOKEN`, if set.
    pub fn from_env() -> Self {
        let api_token = std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty());
        Self {
            api_token,
            ..Self::default()
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(dir.into());
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<String>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn ocr_psm(mut self, psm: u8) -> Self {
        self.config.ocr_psm = psm;
        self
    }

    pub fn min_confidence(mut self, conf: u8) -> Self {
        self.config.min_confidence = conf;
        self
    }

    /// Resolve every default model file name against `dir`.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let rebase = |p: &PathBuf| match p.file_name() {
            Some(name) => dir.join(name),
            None => p.clone(),
        };
        self.config.layout_model = rebase(&self.config.layout_model);
        self.config.table_structure_model = rebase(&self.config.table_structure_model);
        self.config.table_structure_dict = rebase(&self.config.table_structure_dict);
        self.config.orientation_model = self.config.orientation_model.as_ref().map(rebase);
        self
    }

    pub fn layout_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.layout_model = path.into();
        self
    }

    pub fn layout_model_name(mut self, name: impl Into<String>) -> Self {
        self.config.layout_model_name = name.into();
        self
    }

    pub fn table_structure_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.table_structure_model = path.into();
        self
    }

    pub fn table_structure_dict(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.table_structure_dict = path.into();
        self
    }

    pub fn table_score_threshold(mut self, t: f32) -> Self {
        self.config.table_score_threshold = t;
        self
    }

    /// Set the orientation model, or `None` to skip orientation detection.
    pub fn orientation_model(mut self, path: Option<PathBuf>) -> Self {
        self.config.orientation_model = path;
        self
    }

    pub fn lookup_url(mut self, url: impl Into<String>) -> Self {
        self.config.lookup_url = url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn lookup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lookup_timeout_secs = secs;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_template(mut self, template: impl Into<String>) -> Self {
        self.config.system_template = Some(template.into());
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(IngestError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.min_confidence > 100 {
            return Err(IngestError::InvalidConfig(format!(
                "min_confidence must be 0–100, got {}",
                c.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&c.table_score_threshold) {
            return Err(IngestError::InvalidConfig(format!(
                "table_score_threshold must be 0–1, got {}",
                c.table_score_threshold
            )));
        }
        if c.ocr_psm > 13 {
            return Err(IngestError::InvalidConfig(format!(
                "Tesseract PSM must be 0–13, got {}",
                c.ocr_psm
            )));
        }
        if c.ocr_languages.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "OCR language list must not be empty".into(),
            ));
        }
        if !c.lookup_url.starts_with("http://") && !c.lookup_url.starts_with("https://") {
            return Err(IngestError::InvalidConfig(format!(
                "Lookup URL must be http(s), got '{}'",
                c.lookup_url
            )));
        }
        if let Some(ref t) = c.system_template {
            if !t.contains(crate::prompts::DATA_PLACEHOLDER) {
                return Err(IngestError::InvalidConfig(format!(
                    "System template must contain the {} placeholder",
                    crate::prompts::DATA_PLACEHOLDER
                )));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_receipt_pipeline() {
        let c = IngestConfig::default();
        assert_eq!(c.ocr_languages, "rus+eng");
        assert_eq!(c.ocr_psm, 1);
        assert_eq!(c.min_confidence, 50);
        assert_eq!(c.layout_model, PathBuf::from("models/pp-doclayout_plus-l.onnx"));
        assert!(c.orientation_model.is_some());
        assert_eq!(c.lookup_url, DEFAULT_LOOKUP_URL);
        assert!((c.temperature - 0.55).abs() < f32::EPSILON);
    }

    #[test]
    fn build_rejects_out_of_range_dpi() {
        let err = IngestConfig::builder().dpi(20).build().unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn model_dir_rebases_every_model() {
        let c = IngestConfig::builder()
            .model_dir("/opt/receipt-models")
            .build()
            .unwrap();
        assert_eq!(
            c.table_structure_model,
            PathBuf::from("/opt/receipt-models/slanet_plus.onnx")
        );
        assert_eq!(
            c.table_structure_dict,
            PathBuf::from("/opt/receipt-models/table_structure_dict_ch.txt")
        );
        assert_eq!(
            c.orientation_model,
            Some(PathBuf::from("/opt/receipt-models/pp-lcnet_x1_0_doc_ori.onnx"))
        );

        let c = IngestConfig::builder()
            .orientation_model(None)
            .model_dir("/m")
            .build()
            .unwrap();
        assert!(c.orientation_model.is_none());
    }

    #[test]
    fn build_rejects_score_threshold_above_one() {
        assert!(IngestConfig::builder()
            .table_score_threshold(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn build_rejects_template_without_placeholder() {
        let err = IngestConfig::builder()
            .system_template("Structure this receipt.")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{data}"), "got: {err}");
    }

    #[test]
    fn build_rejects_non_http_lookup_url() {
        assert!(IngestConfig::builder()
            .lookup_url("ftp://example.com")
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let c = IngestConfig::builder().api_token("s3cr3t").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("s3cr3t"));
        assert!(dbg.contains("<redacted>"));
    }
}
