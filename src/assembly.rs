// ABOUTME: Streams per-table dump artifacts into one ordered export output
// ABOUTME: Rewrites shadow identifiers inline and deletes each artifact once consumed

use crate::error::{Stage, StageContext};
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Where the assembled export goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `-` means standard output; anything else is a file path
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            bail!("Output target cannot be empty. Use '-' for standard output.");
        }
        if value == "-" {
            return Ok(OutputTarget::Stdout);
        }
        Ok(OutputTarget::File(PathBuf::from(value)))
    }

    pub fn describe(&self) -> String {
        match self {
            OutputTarget::Stdout => "standard output".to_string(),
            OutputTarget::File(path) => path.display().to_string(),
        }
    }
}

/// A temporary dump file holding one table's schema or data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    /// Table the artifact describes, for error context
    pub table: String,
    /// `(from, to)` identifier pair replaced on every line
    pub rewrite: Option<(String, String)>,
}

impl ExportArtifact {
    pub fn new(path: PathBuf, table: impl Into<String>) -> Self {
        Self {
            path,
            table: table.into(),
            rewrite: None,
        }
    }

    pub fn with_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rewrite = Some((from.into(), to.into()));
        self
    }
}

/// Receiver of finished artifacts, in production order
pub trait ArtifactSink {
    fn accept(&mut self, artifact: ExportArtifact) -> Result<()>;
}

enum Destination {
    Stdout(BufWriter<io::Stdout>),
    File {
        temp: BufWriter<NamedTempFile>,
        path: PathBuf,
    },
}

/// Appends artifacts to the output as soon as they are produced
///
/// File output is staged in a temporary file next to the target and only moved
/// into place by [`Assembler::finish`], so a failed run never leaves a
/// half-written export behind.
pub struct Assembler {
    destination: Destination,
    bytes_written: u64,
    artifacts: usize,
}

impl Assembler {
    pub fn new(target: &OutputTarget) -> Result<Self> {
        let destination = match target {
            OutputTarget::Stdout => Destination::Stdout(BufWriter::new(io::stdout())),
            OutputTarget::File(path) => {
                let dir = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let temp = NamedTempFile::new_in(&dir).with_context(|| {
                    StageContext::new(Stage::Assembly).table(path.display().to_string())
                })?;
                Destination::File {
                    temp: BufWriter::new(temp),
                    path: path.clone(),
                }
            }
        };

        Ok(Self {
            destination,
            bytes_written: 0,
            artifacts: 0,
        })
    }

    /// Stream one artifact into the output, then delete it
    pub fn append(&mut self, artifact: &ExportArtifact) -> Result<u64> {
        let context = || StageContext::new(Stage::Assembly).table(artifact.table.clone());

        let file = File::open(&artifact.path)
            .with_context(|| format!("Failed to open artifact {}", artifact.path.display()))
            .with_context(context)?;
        let reader = BufReader::new(file);

        let rewrite = artifact
            .rewrite
            .as_ref()
            .map(|(from, to)| (from.as_bytes(), to.as_bytes()));

        let written = match &mut self.destination {
            Destination::Stdout(out) => copy_rewritten(reader, out, rewrite),
            Destination::File { temp, .. } => copy_rewritten(reader, temp, rewrite),
        }
        .with_context(context)?;

        fs::remove_file(&artifact.path)
            .with_context(|| format!("Failed to remove artifact {}", artifact.path.display()))
            .with_context(context)?;

        self.bytes_written += written;
        self.artifacts += 1;
        tracing::debug!(
            "Appended {} bytes from artifact for '{}'",
            written,
            artifact.table
        );
        Ok(written)
    }

    pub fn artifacts(&self) -> usize {
        self.artifacts
    }

    /// Flush and move the output into place; returns total bytes written
    pub fn finish(self) -> Result<u64> {
        let context = || StageContext::new(Stage::Assembly);
        match self.destination {
            Destination::Stdout(mut out) => {
                out.flush()
                    .context("Failed to flush standard output")
                    .with_context(context)?;
            }
            Destination::File { temp, path } => {
                let temp = temp
                    .into_inner()
                    .map_err(|e| e.into_error())
                    .context("Failed to flush export output")
                    .with_context(context)?;
                temp.as_file()
                    .sync_all()
                    .context("Failed to sync export output")
                    .with_context(context)?;
                temp.persist(&path)
                    .map_err(|e| e.error)
                    .with_context(|| format!("Failed to write export to {}", path.display()))
                    .with_context(context)?;
            }
        }
        Ok(self.bytes_written)
    }
}

impl ArtifactSink for Assembler {
    fn accept(&mut self, artifact: ExportArtifact) -> Result<()> {
        self.append(&artifact).map(|_| ())
    }
}

/// Copy `reader` to `writer` line by line, replacing `from` with `to`
///
/// Works on raw bytes so non-UTF-8 dump content passes through untouched.
pub fn copy_rewritten<R, W>(
    mut reader: R,
    writer: &mut W,
    rewrite: Option<(&[u8], &[u8])>,
) -> Result<u64>
where
    R: BufRead,
    W: Write,
{
    let mut line = Vec::with_capacity(8 * 1024);
    let mut written = 0u64;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .context("Failed to read artifact")?;
        if read == 0 {
            break;
        }

        match rewrite {
            Some((from, to)) if !from.is_empty() => {
                let replaced = replace_bytes(&line, from, to);
                writer
                    .write_all(&replaced)
                    .context("Failed to write export output")?;
                written += replaced.len() as u64;
            }
            _ => {
                writer
                    .write_all(&line)
                    .context("Failed to write export output")?;
                written += line.len() as u64;
            }
        }
    }

    Ok(written)
}

fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
