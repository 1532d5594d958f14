//! Output filename templates
//!
//! Templates use `{host}`, `{date}` (YYMMDD), `{time}` (HHMMSS) and
//! `{index}` placeholders. `{index:N}` zero-pads the index to width N and
//! `{{` / `}}` produce literal braces.

use crate::utils::{AppError, AppResult};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Widest zero padding `{index:N}` accepts
const MAX_INDEX_WIDTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Host,
    Date,
    Time,
    Index { width: Option<usize> },
}

/// A parsed, validated filename template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    segments: Vec<Segment>,
}

/// Values substituted into a template
#[derive(Debug, Clone)]
pub struct FilenameContext<'a> {
    pub host: &'a str,
    pub now: DateTime<Local>,
    pub index: u32,
}

impl FilenameTemplate {
    pub fn parse(template: &str) -> AppResult<Self> {
        if template.is_empty() {
            return Err(AppError::bad_request("Filename template is empty"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(AppError::bad_request(format!(
                            "Unbalanced '{{' in filename template '{}'",
                            template
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_field(&field)?);
                }
                '}' => {
                    return Err(AppError::bad_request(format!(
                        "Unbalanced '}}' in filename template '{}'",
                        template
                    )));
                }
                '/' | '\\' | '\0' => {
                    return Err(AppError::bad_request(format!(
                        "Invalid character {:?} in filename template",
                        c
                    )));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn has_index(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Index { .. }))
    }

    pub fn expand(&self, context: &FilenameContext<'_>) -> String {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Host => name.push_str(context.host),
                Segment::Date => name.push_str(&context.now.format("%y%m%d").to_string()),
                Segment::Time => name.push_str(&context.now.format("%H%M%S").to_string()),
                Segment::Index { width: Some(width) } => {
                    name.push_str(&format!("{:0width$}", context.index, width = *width))
                }
                Segment::Index { width: None } => name.push_str(&context.index.to_string()),
            }
        }
        name
    }
}

fn parse_field(field: &str) -> AppResult<Segment> {
    let (name, format) = match field.split_once(':') {
        Some((name, format)) => (name, Some(format)),
        None => (field, None),
    };

    match (name, format) {
        ("host", None) => Ok(Segment::Host),
        ("date", None) => Ok(Segment::Date),
        ("time", None) => Ok(Segment::Time),
        ("index", None) => Ok(Segment::Index { width: None }),
        ("index", Some(format)) => {
            let width = format.trim_start_matches('0');
            let width = if width.is_empty() { "0" } else { width };
            match width.parse::<usize>() {
                Ok(width) if width <= MAX_INDEX_WIDTH => Ok(Segment::Index { width: Some(width) }),
                Ok(width) => Err(AppError::bad_request(format!(
                    "Index width {} exceeds the maximum of {}",
                    width, MAX_INDEX_WIDTH
                ))),
                Err(_) => Err(AppError::bad_request(format!("Invalid index format '{}'", format))),
            }
        }
        (name, Some(_)) if ["host", "date", "time"].contains(&name) => Err(AppError::bad_request(
            format!("Placeholder '{}' does not take a format", name),
        )),
        (name, _) => Err(AppError::bad_request(format!(
            "Unknown placeholder '{{{}}}' in filename template",
            name
        ))),
    }
}

/// Sidecar timestamp file sharing the media file's base name
pub fn sidecar_path(media: &Path) -> PathBuf {
    media.with_extension("txt")
}

/// Picks names for new output files, skipping names already on disk.
#[derive(Debug, Clone)]
pub struct FilenameAllocator<'a> {
    pub directory: &'a Path,
    pub template: &'a FilenameTemplate,
    pub extension: &'a str,
    pub host: &'a str,
    pub retry_limit: u32,
}

impl FilenameAllocator<'_> {
    /// Find the first free name at or after `index`.
    ///
    /// Returns the path and the index it was expanded with. Templates
    /// without `{index}` get a numeric suffix on collision.
    pub fn allocate(&self, index: u32, now: DateTime<Local>) -> AppResult<(PathBuf, u32)> {
        for attempt in 0..self.retry_limit.max(1) {
            let candidate_index = index + attempt;
            let mut name = self.template.expand(&FilenameContext {
                host: self.host,
                now,
                index: candidate_index,
            });
            if attempt > 0 && !self.template.has_index() {
                name = format!("{}_{}", name, attempt);
            }
            let path = self.directory.join(self.with_extension(name));

            if !path.exists() && !sidecar_path(&path).exists() {
                return Ok((path, candidate_index));
            }
            tracing::debug!("Filename {:?} taken, retrying", path);
        }

        Err(AppError::FilenameExhausted(self.retry_limit))
    }

    fn with_extension(&self, name: String) -> String {
        let suffix = format!(".{}", self.extension);
        if name.ends_with(&suffix) {
            name
        } else {
            name + &suffix
        }
    }
}
