//! Program image file format.
//!
//! A plain-text hex image:
//! - One 32-bit word per line, 8 hex digits, optional `0x` prefix
//! - Anything after `;` is a comment
//! - Blank lines are ignored
//!
//! Words are loaded in order starting at the load base.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

use crate::asm::disasm::disassemble_instruction;

/// A loaded program image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    /// The program words.
    pub words: Vec<u32>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ProgramImage {
    /// Create a new empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an image from raw words.
    pub fn from_words(words: &[u32]) -> Self {
        Self {
            words: words.to_vec(),
            source_lines: words.iter().map(|w| format!("{:08x}", w)).collect(),
        }
    }

    /// Add a word.
    pub fn push(&mut self, word: u32, source: &str) {
        self.words.push(word);
        self.source_lines.push(source.to_string());
    }

    /// Get the number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Parse image text.
pub fn parse_image(text: &str) -> Result<ProgramImage, ImageError> {
    let mut image = ProgramImage::new();

    for (line_num, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        let data = match trimmed.find(';') {
            Some(idx) => trimmed[..idx].trim(),
            None => trimmed,
        };

        if data.is_empty() {
            continue;
        }

        let digits = data
            .strip_prefix("0x")
            .or_else(|| data.strip_prefix("0X"))
            .unwrap_or(data);

        if digits.is_empty() || digits.len() > 8 {
            return Err(ImageError::ParseError {
                line: line_num + 1,
                message: format!("expected up to 8 hex digits, found `{}`", data),
            });
        }

        let word = u32::from_str_radix(digits, 16).map_err(|e| ImageError::ParseError {
            line: line_num + 1,
            message: e.to_string(),
        })?;

        image.push(word, trimmed);
    }

    Ok(image)
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| ImageError::IoError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut text = String::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ImageError::IoError(e.to_string()))?;
        text.push_str(&line);
        text.push('\n');
    }

    parse_image(&text)
}

/// Save an image to disk, annotating each word with its address and disassembly.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    let mut file = std::fs::File::create(path.as_ref()).map_err(|e| ImageError::IoError(e.to_string()))?;
    write_image(&mut file, image).map_err(|e| ImageError::IoError(e.to_string()))
}

fn write_image<W: Write>(out: &mut W, image: &ProgramImage) -> std::io::Result<()> {
    writeln!(out, "; cycle-sim program image")?;
    writeln!(out, "; {} words", image.len())?;
    writeln!(out)?;

    for (i, word) in image.words.iter().enumerate() {
        let addr = i as u32 * 4;
        writeln!(out, "{:08x} ; {:04x}: {}", word, addr, disassemble_instruction(*word, addr))?;
    }

    Ok(())
}

/// Errors that can occur reading or writing images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image() {
        let text = "; header\n\n0x04221800 ; ADD r1, r2, r3\n00000000\n  ff ; data\n";
        let image = parse_image(text).unwrap();
        assert_eq!(image.words, vec![0x0422_1800, 0, 0xff]);
        assert_eq!(image.len(), 3);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = parse_image("00000000\nnothex\n").unwrap_err();
        assert!(matches!(err, ImageError::ParseError { line: 2, .. }));

        let err = parse_image("123456789\n").unwrap_err();
        assert!(matches!(err, ImageError::ParseError { line: 1, .. }));
    }

    #[test]
    fn test_image_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.hex");
        let image = ProgramImage::from_words(&[0x0422_1800, 0x0000_0000, 0xdead_beef]);

        save_image(&path, &image).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.words, image.words);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(load_image("/definitely/not/here.hex"), Err(ImageError::IoError(_))));
    }
}
