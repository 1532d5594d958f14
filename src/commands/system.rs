//! Host system control
//!
//! Power and clock commands for the node. Everything privileged goes
//! through the launcher (normally `sudo`).

use crate::rpc::{to_json, Args, RpcObject};
use crate::utils::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::process::Command;

/// `date -Iseconds` output, e.g. `2020-08-25T16:32:15+01:00`
static DATE_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}[+-][0-9]{2}:[0-9]{2}$")
        .expect("date pattern is valid")
});

const SERVICE_NAME: &str = "monitor";

pub struct SystemControl {
    launcher: Vec<String>,
}

impl Default for SystemControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControl {
    pub fn new() -> Self {
        Self::with_launcher(vec!["sudo".to_string()])
    }

    /// Prefix every privileged command with `launcher` instead of `sudo`
    pub fn with_launcher(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    pub fn shutdown(&self) -> AppResult<String> {
        self.run(&["shutdown", "-h", "now"])
    }

    pub fn reboot(&self) -> AppResult<String> {
        self.run(&["reboot"])
    }

    pub fn restart_service(&self) -> AppResult<String> {
        self.run(&["systemctl", "restart", SERVICE_NAME])
    }

    pub fn set_date(&self, datetime: &str) -> AppResult<String> {
        validate_date(datetime)?;
        self.run(&["date", &format!("--set={}", datetime)])
    }

    pub fn get_date(&self) -> String {
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }

    fn run(&self, command: &[&str]) -> AppResult<String> {
        let mut args: Vec<&str> = self
            .launcher
            .iter()
            .map(String::as_str)
            .chain(command.iter().copied())
            .collect();
        if args.is_empty() {
            return Err(AppError::bad_request("Empty command"));
        }
        let program = args.remove(0);

        tracing::info!("Running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| AppError::Command(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Command(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn validate_date(datetime: &str) -> AppResult<()> {
    if DATE_FORMAT.is_match(datetime) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "Invalid date '{}', expected the format of date -Iseconds (e.g. 2020-08-25T16:32:15+01:00)",
            datetime
        )))
    }
}

impl RpcObject for SystemControl {
    fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
        match method {
            "shutdown" => {
                args.check(&[])?;
                to_json(self.shutdown()?)
            }
            "reboot" => {
                args.check(&[])?;
                to_json(self.reboot()?)
            }
            "restart_service" => {
                args.check(&[])?;
                to_json(self.restart_service()?)
            }
            "set_date" => {
                args.check(&["datetime"])?;
                let datetime: String = args.required(0, "datetime")?;
                to_json(self.set_date(&datetime)?)
            }
            "get_date" => {
                args.check(&[])?;
                to_json(self.get_date())
            }
            _ => Err(self.unknown_method(method)),
        }
    }
}
