//! Recording files on the node's disk

use crate::rpc::{to_json, Args, RpcObject};
use crate::utils::{AppError, AppResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct FileSystem {
    converter: Vec<String>,
    converting: Arc<AtomicBool>,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    pub fn new() -> Self {
        Self::with_converter(vec!["ffmpeg".to_string()])
    }

    /// Use `converter` in place of `ffmpeg`; the ffmpeg arguments follow it
    pub fn with_converter(converter: Vec<String>) -> Self {
        Self {
            converter,
            converting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Human readable free space on the filesystem holding `directory`
    pub fn get_disk_space(&self, directory: &Path) -> AppResult<String> {
        let output = Command::new("df")
            .arg("-h")
            .arg(directory)
            .output()
            .map_err(|e| AppError::Command(format!("Failed to run df: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Command(format!("df failed: {}", stderr.trim())));
        }
        parse_available(&String::from_utf8_lossy(&output.stdout))
    }

    /// `[stem, extension]` of every entry in `directory`, sorted. The
    /// extension keeps its dot and is empty when there is none.
    pub fn get_filenames(&self, directory: &Path) -> AppResult<Vec<[String; 2]>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            names.push([stem, extension]);
        }
        names.sort();
        Ok(names)
    }

    /// Remux `filename` into an mp4 next to it in the background.
    ///
    /// Only one conversion runs at a time.
    pub fn convert_video(&self, filename: &Path) -> AppResult<PathBuf> {
        if !filename.is_file() {
            return Err(AppError::bad_request(format!("No such video {:?}", filename)));
        }
        let (program, launcher_args) = self
            .converter
            .split_first()
            .ok_or_else(|| AppError::bad_request("No converter configured"))?;

        if self.converting.swap(true, Ordering::SeqCst) {
            return Err(AppError::Busy("Only one conversion at a time".to_string()));
        }

        let target = filename.with_extension("mp4");
        let spawned = Command::new(program)
            .args(launcher_args)
            .arg("-y")
            .arg("-i")
            .arg(filename)
            .args(["-c", "copy"])
            .arg(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.converting.store(false, Ordering::SeqCst);
                return Err(AppError::Command(format!("Failed to start {}: {}", program, e)));
            }
        };

        tracing::info!("Converting {:?} to {:?}", filename, target);
        let converting = Arc::clone(&self.converting);
        let source = filename.to_path_buf();
        std::thread::spawn(move || {
            match child.wait_with_output() {
                Ok(output) if output.status.success() => {
                    tracing::info!("Converted {:?}", source);
                }
                Ok(output) => tracing::error!(
                    "Conversion of {:?} failed: {}",
                    source,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => tracing::error!("Conversion of {:?} failed: {}", source, e),
            }
            converting.store(false, Ordering::SeqCst);
        });

        Ok(target)
    }

    pub fn is_converting(&self) -> bool {
        self.converting.load(Ordering::SeqCst)
    }
}

/// Available column of the last line of `df -h` output
fn parse_available(output: &str) -> AppResult<String> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .and_then(|line| line.split_whitespace().nth(3))
        .map(str::to_string)
        .ok_or_else(|| AppError::Command(format!("Unexpected df output: {}", output.trim())))
}

impl RpcObject for FileSystem {
    fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
        match method {
            "get_disk_space" => {
                args.check(&["directory"])?;
                let directory: PathBuf = args.get_or(0, "directory", PathBuf::from("/"))?;
                to_json(self.get_disk_space(&directory)?)
            }
            "get_filenames" => {
                args.check(&["directory"])?;
                let directory: PathBuf = args.required(0, "directory")?;
                to_json(self.get_filenames(&directory)?)
            }
            "convert_video" => {
                args.check(&["filename"])?;
                let filename: PathBuf = args.required(0, "filename")?;
                to_json(self.convert_video(&filename)?)
            }
            "is_converting" => {
                args.check(&[])?;
                to_json(self.is_converting())
            }
            _ => Err(self.unknown_method(method)),
        }
    }
}
