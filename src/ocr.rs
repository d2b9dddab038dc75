//! OCR aggregation and text search.
//!
//! The recognition engine runs as an external process and emits a flat
//! tab-separated table, one row per detected element at one of several
//! hierarchy levels. This module reconstructs line-level text/geometry from
//! that table and supports searching the result.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Frame;

/// Row level for word entries in the engine's table.
const LEVEL_LINE: u32 = 4;
const LEVEL_WORD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        BoundingBox::new(x, y, right - x, bottom - y)
    }
}

/// One recognized word. Belongs to exactly one line sharing
/// (block, paragraph, line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// 0-100 when the engine reports one.
    pub confidence: Option<f32>,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub word: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// Aggregated recognition output for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// Lines joined by newline, in (block, paragraph, line) order.
    pub text: String,
    pub lines: Vec<OcrLine>,
    pub words: Vec<OcrWord>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Where a text match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Line,
    Word,
}

/// Search scope for [`find_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindScope {
    Line,
    Word,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMatch {
    pub level: MatchLevel,
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FindOptions {
    pub scope: FindScope,
    pub case_sensitive: bool,
    /// Treat the query as a regular expression instead of a literal.
    pub regex: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            scope: FindScope::Both,
            case_sensitive: false,
            regex: false,
        }
    }
}

/// Parse the engine's table and aggregate words into lines.
///
/// Columns: level, page, block, paragraph, line, word, left, top, width,
/// height, confidence, text. The first row seen for a (block, paragraph,
/// line) key seeds the line; every subsequent word row for the key appends
/// its text, widens the bounding box to the union, and averages confidence
/// pairwise with the line's running value. The pairwise running average is
/// not a weighted mean over all merged words; it is kept as-is.
pub fn parse_tsv(tsv: &str, width: u32, height: u32) -> OcrResult {
    let mut words = Vec::new();
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut line_index: HashMap<(u32, u32, u32), usize> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: u32 = match cols[0].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if level != LEVEL_LINE && level != LEVEL_WORD {
            continue;
        }
        let parse_u32 = |s: &str| s.parse::<u32>().unwrap_or(0);
        let parse_i32 = |s: &str| s.parse::<i32>().unwrap_or(0);
        let (block, paragraph, line) = (parse_u32(cols[2]), parse_u32(cols[3]), parse_u32(cols[4]));
        let bbox = BoundingBox::new(
            parse_i32(cols[6]),
            parse_i32(cols[7]),
            parse_i32(cols[8]),
            parse_i32(cols[9]),
        );
        let confidence = cols[10].parse::<f32>().ok().filter(|c| *c >= 0.0);
        let text = cols[11].trim();

        if level == LEVEL_WORD {
            words.push(OcrWord {
                text: text.to_string(),
                bbox,
                confidence,
                block,
                paragraph,
                line,
                word: parse_u32(cols[5]),
            });
        }

        let key = (block, paragraph, line);
        match line_index.get(&key).copied() {
            None => {
                line_index.insert(key, lines.len());
                lines.push(OcrLine {
                    text: text.to_string(),
                    bbox,
                    confidence,
                    block,
                    paragraph,
                    line,
                });
            }
            Some(idx) if level == LEVEL_WORD => {
                let entry = &mut lines[idx];
                if entry.text.is_empty() {
                    entry.text = text.to_string();
                } else if !text.is_empty() {
                    entry.text.push(' ');
                    entry.text.push_str(text);
                }
                entry.bbox = entry.bbox.union(&bbox);
                entry.confidence = match (entry.confidence, confidence) {
                    (Some(a), Some(b)) => Some((a + b) / 2.0),
                    (None, c) => c,
                    (c, None) => c,
                };
            }
            Some(_) => {}
        }
    }

    lines.sort_by_key(|l| (l.block, l.paragraph, l.line));
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    OcrResult {
        text,
        lines,
        words,
        width,
        height,
        captured_at: Utc::now(),
    }
}

/// Search an aggregated result for a literal string or pattern.
///
/// Performs no capture; callers pair it with a fresh snapshot+OCR pass.
pub fn find_text(result: &OcrResult, query: &str, options: &FindOptions) -> Result<Vec<TextMatch>> {
    let matcher: Box<dyn Fn(&str) -> bool> = if options.regex {
        let pattern = if options.case_sensitive {
            query.to_string()
        } else {
            format!("(?i){}", query)
        };
        let re = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("invalid search pattern: {}", e)))?;
        Box::new(move |text: &str| re.is_match(text))
    } else if options.case_sensitive {
        let needle = query.to_string();
        Box::new(move |text: &str| text.contains(&needle))
    } else {
        let needle = query.to_lowercase();
        Box::new(move |text: &str| text.to_lowercase().contains(&needle))
    };

    let mut matches = Vec::new();
    if matches!(options.scope, FindScope::Line | FindScope::Both) {
        for line in &result.lines {
            if matcher(&line.text) {
                matches.push(TextMatch {
                    level: MatchLevel::Line,
                    text: line.text.clone(),
                    bbox: line.bbox,
                    confidence: line.confidence,
                });
            }
        }
    }
    if matches!(options.scope, FindScope::Word | FindScope::Both) {
        for word in &result.words {
            if matcher(&word.text) {
                matches.push(TextMatch {
                    level: MatchLevel::Word,
                    text: word.text.clone(),
                    bbox: word.bbox,
                    confidence: word.confidence,
                });
            }
        }
    }
    Ok(matches)
}

/// External recognition engine invoked per frame.
#[derive(Debug, Clone)]
pub struct OcrEngine {
    command: String,
}

impl OcrEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    /// Stage the frame to disk, run the engine, aggregate its table.
    pub async fn recognize(&self, frame: &Frame) -> Result<OcrResult> {
        let staging = tempfile::tempdir().map_err(|e| Error::Capture(e.to_string()))?;
        let input = staging.path().join("frame.png");
        tokio::fs::write(&input, &frame.data)
            .await
            .map_err(|e| Error::Capture(format!("stage ocr input: {}", e)))?;

        let output = Command::new(&self.command)
            .arg(&input)
            .arg("stdout")
            .arg("tsv")
            .output()
            .await
            .map_err(|e| Error::Capture(format!("failed to run {}: {}", self.command, e)))?;
        // staging dir removed on drop, on every exit path
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Capture(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = parse_tsv(&tsv, frame.width, frame.height);
        debug!(
            "ocr recognized {} words in {} lines",
            result.words.len(),
            result.lines.len()
        );
        Ok(result)
    }
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word_row(block: u32, par: u32, line: u32, word: u32, bbox: (i32, i32, i32, i32), conf: f32, text: &str) -> String {
        format!(
            "5\t1\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            block, par, line, word, bbox.0, bbox.1, bbox.2, bbox.3, conf, text
        )
    }

    #[test]
    fn words_merge_into_one_line() {
        let tsv = format!(
            "{}\n{}\n{}",
            HEADER,
            word_row(1, 1, 1, 1, (0, 0, 50, 20), 90.0, "Hello"),
            word_row(1, 1, 1, 2, (55, 0, 50, 20), 80.0, "World"),
        );
        let result = parse_tsv(&tsv, 640, 480);

        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.words.len(), 2);
        let line = &result.lines[0];
        assert_eq!(line.text, "Hello World");
        assert_eq!(line.bbox, BoundingBox::new(0, 0, 105, 20));
        // pairwise running average, not a weighted mean
        assert_eq!(line.confidence, Some(85.0));
        assert_eq!(result.text, "Hello World");
    }

    #[test]
    fn line_row_seeds_then_words_append() {
        let line_row = "4\t1\t1\t1\t1\t0\t0\t0\t120\t20\t-1\t";
        let tsv = format!(
            "{}\n{}\n{}\n{}",
            HEADER,
            line_row,
            word_row(1, 1, 1, 1, (0, 0, 50, 20), 90.0, "Hello"),
            word_row(1, 1, 1, 2, (55, 0, 50, 20), 70.0, "World"),
        );
        let result = parse_tsv(&tsv, 640, 480);

        assert_eq!(result.lines.len(), 1);
        let line = &result.lines[0];
        assert_eq!(line.text, "Hello World");
        // line row had no confidence; first word seeds, second averages
        assert_eq!(line.confidence, Some(80.0));
    }

    #[test]
    fn lines_sort_by_hierarchy_indices() {
        let tsv = format!(
            "{}\n{}\n{}\n{}",
            HEADER,
            word_row(2, 1, 1, 1, (0, 100, 40, 20), 90.0, "third"),
            word_row(1, 2, 1, 1, (0, 50, 40, 20), 90.0, "second"),
            word_row(1, 1, 1, 1, (0, 0, 40, 20), 90.0, "first"),
        );
        let result = parse_tsv(&tsv, 640, 480);
        assert_eq!(result.text, "first\nsecond\nthird");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let tsv = format!("{}\ngarbage\n5\t1\t1\n{}", HEADER, word_row(1, 1, 1, 1, (0, 0, 10, 10), 50.0, "ok"));
        let result = parse_tsv(&tsv, 100, 100);
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].text, "ok");
    }

    #[test]
    fn case_insensitive_line_search() {
        let tsv = format!(
            "{}\n{}\n{}",
            HEADER,
            word_row(1, 1, 1, 1, (0, 0, 80, 20), 90.0, "welcome"),
            word_row(1, 1, 1, 2, (85, 0, 40, 20), 90.0, "back"),
        );
        let result = parse_tsv(&tsv, 640, 480);
        let options = FindOptions { scope: FindScope::Line, ..FindOptions::default() };
        let matches = find_text(&result, "Welcome", &options).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].level, MatchLevel::Line);
        assert_eq!(matches[0].text, "welcome back");
    }

    #[test]
    fn word_scope_matches_words_only() {
        let tsv = format!(
            "{}\n{}\n{}",
            HEADER,
            word_row(1, 1, 1, 1, (0, 0, 80, 20), 90.0, "Submit"),
            word_row(1, 1, 2, 1, (0, 30, 80, 20), 90.0, "Cancel"),
        );
        let result = parse_tsv(&tsv, 640, 480);
        let options = FindOptions { scope: FindScope::Word, ..FindOptions::default() };
        let matches = find_text(&result, "submit", &options).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].level, MatchLevel::Word);
    }

    #[test]
    fn regex_search_with_scope_both() {
        let tsv = format!("{}\n{}", HEADER, word_row(1, 1, 1, 1, (0, 0, 80, 20), 90.0, "Error42"));
        let result = parse_tsv(&tsv, 640, 480);
        let options = FindOptions { scope: FindScope::Both, regex: true, ..FindOptions::default() };
        let matches = find_text(&result, r"error\d+", &options).unwrap();
        // one line match and one word match for the same text
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let result = parse_tsv(HEADER, 10, 10);
        let options = FindOptions { regex: true, ..FindOptions::default() };
        assert!(find_text(&result, "(unclosed", &options).is_err());
    }
}
