use std::path::Path;
use thiserror::Error;

use chitu_shared::metadata::{Dimensions, PrintingArea};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported file format {0}")]
    Unsupported(String),
    #[error("invalid sliced file: {0}")]
    Invalid(String),
}

/// Everything the worker reports about one sliced model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlicedModelFile {
    pub filename: String,
    /// Width, depth, height.
    pub bed_size_mm: [f64; 3],
    pub height_mm: f64,
    pub layer_count: u32,
    pub layer_height_mm: f64,
    /// Pixels, x by y.
    pub resolution: [u32; 2],
    pub print_time_secs: f64,
    /// mm³ of resin.
    pub volume: f64,
    pub printer_name: String,
    pub printing_area: PrintingArea,
    pub dimensions: Dimensions,
}

/// Reads one family of sliced-file formats.
pub trait SlicedFileDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase extensions without the leading dot.
    fn extensions(&self) -> &[&'static str];

    fn decode(&self, path: &Path) -> Result<SlicedModelFile, DecodeError>;
}

/// Decoders known to the worker, looked up by file extension.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn SlicedFileDecoder>>,
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.decoders.iter().map(|d| d.name())).finish()
    }
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, decoder: Box<dyn SlicedFileDecoder>) {
        tracing::debug!("Registered sliced file decoder {}", decoder.name());
        self.decoders.push(decoder);
    }

    pub fn decoder_for(&self, path: &Path) -> Option<&dyn SlicedFileDecoder> {
        let extension = path.extension()?.to_string_lossy().to_lowercase();
        self.decoders
            .iter()
            .find(|decoder| decoder.extensions().contains(&extension.as_str()))
            .map(|decoder| decoder.as_ref())
    }

    pub fn decode(&self, path: &Path) -> Result<SlicedModelFile, DecodeError> {
        let decoder = self
            .decoder_for(path)
            .ok_or_else(|| DecodeError::Unsupported(path.display().to_string()))?;
        tracing::debug!("Decoding {} with {}", path.display(), decoder.name());
        decoder.decode(path)
    }
}
