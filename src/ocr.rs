use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

pub const DEFAULT_TESSERACT_CMD: &str = "tesseract";
pub const DEFAULT_PDFTOPPM_CMD: &str = "pdftoppm";

/// Image bytes to text. `None` means nothing usable was recognised.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Option<String>;
}

/// Renders one 1-based page of a paginated document to image bytes.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, path: &Path, page: usize) -> Option<Vec<u8>>;
}

/// Engine used when OCR is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _image: &[u8]) -> Option<String> {
        None
    }
}

impl PageRasterizer for NoOcr {
    fn rasterize(&self, _path: &Path, _page: usize) -> Option<Vec<u8>> {
        None
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    cmd: String,
}

impl TesseractOcr {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    fn run(&self, image: &[u8]) -> Result<String, String> {
        let mut child = Command::new(&self.cmd)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.cmd))?;

        child
            .stdin
            .take()
            .ok_or_else(|| "tesseract stdin unavailable".to_string())?
            .write_all(image)
            .map_err(|e| format!("failed to send image to {}: {e}", self.cmd))?;

        let output = child
            .wait_with_output()
            .map_err(|e| format!("failed to wait for {}: {e}", self.cmd))?;
        if !output.status.success() {
            return Err(format!(
                "{} exited with {}: {}",
                self.cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new(DEFAULT_TESSERACT_CMD)
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &[u8]) -> Option<String> {
        match self.run(image) {
            Ok(text) => {
                debug!(chars = text.len(), "ocr finished");
                non_blank(text)
            }
            Err(e) => {
                warn!("ocr failed: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    cmd: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            dpi: 300,
        }
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_PDFTOPPM_CMD)
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, path: &Path, page: usize) -> Option<Vec<u8>> {
        let page_arg = page.to_string();
        let output = Command::new(&self.cmd)
            .args(["-png", "-singlefile", "-r"])
            .arg(self.dpi.to_string())
            .args(["-f", &page_arg, "-l", &page_arg])
            .arg(path)
            .output();

        match output {
            Ok(out) if out.status.success() && !out.stdout.is_empty() => Some(out.stdout),
            Ok(out) => {
                warn!(
                    page,
                    file = %path.display(),
                    "rasterizing failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                warn!(page, file = %path.display(), "failed to start {}: {e}", self.cmd);
                None
            }
        }
    }
}
