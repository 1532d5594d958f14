//! RPC surface of the recording scheduler

use crate::device::MediaKind;
use crate::recorder::RecordingScheduler;
use crate::rpc::{to_json, Args, RpcObject};
use crate::utils::AppResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{Map, Value};
use std::path::PathBuf;

impl RpcObject for RecordingScheduler {
    fn name(&self) -> String {
        match self.kind() {
            MediaKind::Video => "CameraScheduler",
            MediaKind::Audio => "MicScheduler",
        }
        .to_string()
    }

    fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
        match method {
            "get_config" => {
                args.check(&[])?;
                to_json(self.get_config())
            }
            "set_config" => {
                args.check(&["patch", "merge", "persist"])?;
                let patch: Value = args.get_or(0, "patch", Value::Object(Map::new()))?;
                let merge = args.get_or(1, "merge", false)?;
                let persist = args.get_or(2, "persist", false)?;
                self.set_config(&patch, merge, persist)?;
                Ok(Value::Null)
            }
            "start_recording" => {
                args.check(&[])?;
                self.start_recording()?;
                Ok(Value::Null)
            }
            "split_recording" => {
                args.check(&[])?;
                self.split_recording()?;
                Ok(Value::Null)
            }
            "stop_recording" => {
                args.check(&[])?;
                self.stop_recording()?;
                Ok(Value::Null)
            }
            "is_recording" => {
                args.check(&[])?;
                to_json(self.is_recording())
            }
            "status" => {
                args.check(&[])?;
                to_json(self.status())
            }
            "current_frame" => {
                args.check(&[])?;
                to_json(BASE64.encode(self.current_frame()?))
            }
            "static_directory" => {
                args.check(&[])?;
                to_json(self.output_directory())
            }
            "start" => {
                args.check(&[])?;
                self.start()?;
                Ok(Value::Null)
            }
            "stop" => {
                args.check(&[])?;
                self.stop()?;
                Ok(Value::Null)
            }
            _ => Err(self.unknown_method(method)),
        }
    }

    fn static_root(&self) -> Option<PathBuf> {
        Some(self.output_directory())
    }
}
