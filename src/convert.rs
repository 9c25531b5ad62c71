//! Screenshot post-processing for e-ink displays.
//!
//! Pixel work is done by GraphicsMagick or ImageMagick, fed through
//! stdin/stdout. The operations run in a fixed order:
//!
//! 1. gamma (`1/2.2` when removing gamma, identity otherwise)
//! 2. dither on/off
//! 3. rotation, with white filling the exposed background
//! 4. color mode (`GrayScale` / `TrueColor`)
//! 5. black/white level remapping
//! 6. bit depth
//! 7. quality 100
//!
//! # Requirements
//!
//! - GraphicsMagick (`gm`), or ImageMagick (`convert`) when configured

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{ConvertBackend, ImageFormat, PageConfig, PostProcessProfile};
use crate::error::Error;

/// Gamma applied when `remove_gamma` is set.
const DEGAMMA: f64 = 1.0 / 2.2;

/// Pixel transform capability.
#[async_trait]
pub trait PixelTransform: Send + Sync {
    /// Apply `profile` and `rotation` to an encoded image, re-encoding as `format`.
    async fn transform(
        &self,
        image: Vec<u8>,
        profile: &PostProcessProfile,
        rotation: i32,
        format: ImageFormat,
    ) -> Result<Vec<u8>, Error>;
}

/// Convert a raw screenshot for the page's device.
///
/// Pages without a post-process profile get their screenshot back unchanged.
pub async fn process(
    transform: &dyn PixelTransform,
    image: Vec<u8>,
    page: &PageConfig,
) -> Result<Vec<u8>, Error> {
    match &page.post_process {
        Some(profile) => {
            transform
                .transform(image, profile, page.rotation, page.image_format)
                .await
        }
        None => Ok(image),
    }
}

/// GraphicsMagick / ImageMagick command line converter.
#[derive(Debug, Clone, Default)]
pub struct Magick {
    backend: ConvertBackend,
}

impl Magick {
    pub fn new(backend: ConvertBackend) -> Self {
        Self { backend }
    }

    fn command(&self) -> Command {
        match self.backend {
            ConvertBackend::GraphicsMagick => {
                let mut command = Command::new("gm");
                command.arg("convert");
                command
            }
            ConvertBackend::ImageMagick => Command::new("convert"),
        }
    }

    /// Conversion arguments, reading from stdin and writing to stdout.
    fn args(
        &self,
        profile: &PostProcessProfile,
        rotation: i32,
        format: ImageFormat,
    ) -> Vec<String> {
        let gamma = if profile.remove_gamma { DEGAMMA } else { 1.0 };

        let mut args = vec!["-".to_string(), "-gamma".to_string(), gamma.to_string()];

        match (profile.dither, self.backend) {
            (false, _) => args.push("+dither".to_string()),
            (true, ConvertBackend::GraphicsMagick) => args.push("-dither".to_string()),
            // ImageMagick wants a dither method
            (true, ConvertBackend::ImageMagick) => {
                args.extend(["-dither".to_string(), "FloydSteinberg".to_string()])
            }
        }

        args.extend([
            "-background".to_string(),
            "white".to_string(),
            "-rotate".to_string(),
            rotation.to_string(),
            "-type".to_string(),
            profile.color_mode.as_str().to_string(),
            "-level".to_string(),
            format!("{},{}", profile.black_level, profile.white_level),
            "-depth".to_string(),
            profile.grayscale_depth.to_string(),
            "-quality".to_string(),
            "100".to_string(),
            format!("{}:-", format.as_str()),
        ]);

        args
    }
}

#[async_trait]
impl PixelTransform for Magick {
    async fn transform(
        &self,
        image: Vec<u8>,
        profile: &PostProcessProfile,
        rotation: i32,
        format: ImageFormat,
    ) -> Result<Vec<u8>, Error> {
        let args = self.args(profile, rotation, format);
        tracing::debug!("Converting image: {:?} {}", self.backend, args.join(" "));

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::PostProcess(format!("Failed to run {:?}: {}", self.backend, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::PostProcess("stdin not captured".to_string()))?;

        // Feed stdin concurrently so a full stdout pipe cannot deadlock us
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&image).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::PostProcess(e.to_string()))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::PostProcess(format!("Failed to write image: {}", e))),
            Err(e) => return Err(Error::PostProcess(e.to_string())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::PostProcess(format!(
                "{:?} exited with {}: {}",
                self.backend,
                output.status,
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(Error::PostProcess("Converter produced no output".to_string()));
        }

        tracing::debug!("Converted image: {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}
