//! Isolated worker side
//!
//! A worker process hosts one object and answers JSON-line requests on
//! stdin with JSON-line replies on stdout. Logs go to stderr.

use super::envelope::{Request, Response};
use super::object::{to_json, RpcObject};
use crate::utils::{AppError, AppResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Reserved method returning the hosted object's registration name
pub const NAME_METHOD: &str = "__name__";
/// Reserved method returning the hosted object's static root
pub const STATIC_ROOT_METHOD: &str = "__static_root__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub id: Uuid,
    #[serde(flatten)]
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl WorkerReply {
    pub fn new(id: Uuid, result: &AppResult<Value>) -> Self {
        Self {
            id,
            response: Response::from_result(result),
            code: result.as_ref().err().map(|e| e.code()),
        }
    }

    pub fn into_result(self) -> AppResult<Value> {
        self.response.into_result(self.code)
    }
}

fn handle(object: &dyn RpcObject, request: &Request) -> AppResult<Value> {
    match request.method.as_str() {
        NAME_METHOD => to_json(object.name()),
        STATIC_ROOT_METHOD => to_json(object.static_root()),
        method => panic::catch_unwind(AssertUnwindSafe(|| object.call(method, &request.args)))
            .unwrap_or_else(|_| {
                Err(AppError::Command(format!(
                    "{}.{} panicked",
                    object.name(),
                    method
                )))
            }),
    }
}

/// Answer requests until `input` reaches end of file
pub fn serve<R: BufRead, W: Write>(object: &dyn RpcObject, input: R, mut output: W) -> AppResult<()> {
    tracing::info!("Worker serving {}", object.name());

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(error) => {
                tracing::error!("Dropping malformed worker request: {}", error);
                continue;
            }
        };

        let result = handle(object, &request.request);
        if let Err(error) = &result {
            tracing::debug!("{} failed: {}", request.request.method, error);
        }

        serde_json::to_writer(&mut output, &WorkerReply::new(request.id, &result))?;
        output.write_all(b"\n")?;
        output.flush()?;
    }

    tracing::info!("Worker input closed, exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::envelope::Args;
    use serde_json::json;
    use std::io::Cursor;

    struct Greeter;

    impl RpcObject for Greeter {
        fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
            match method {
                "greet" => {
                    let name: String = args.required(0, "name")?;
                    to_json(format!("hello {}", name))
                }
                "busy" => Err(AppError::Busy("conversion running".into())),
                _ => Err(self.unknown_method(method)),
            }
        }
    }

    fn line(id: Uuid, method: &str, args: Vec<Value>) -> String {
        let request = WorkerRequest {
            id,
            request: Request::new(method, Args::positional(args)),
        };
        serde_json::to_string(&request).unwrap() + "\n"
    }

    fn replies(input: String) -> Vec<WorkerReply> {
        let mut output = Vec::new();
        serve(&Greeter, Cursor::new(input), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_replies_carry_request_ids() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let input = line(a, "greet", vec![json!("pi")]) + "garbage\n" + &line(b, NAME_METHOD, vec![]);

        let replies = replies(input);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].id, a);
        assert_eq!(replies[0].clone().into_result().unwrap(), json!("hello pi"));
        assert_eq!(replies[1].id, b);
        assert_eq!(replies[1].clone().into_result().unwrap(), json!("Greeter"));
    }

    #[test]
    fn test_error_code_is_relayed() {
        let replies = replies(line(Uuid::new_v4(), "busy", vec![]));
        let error = replies[0].clone().into_result().unwrap_err();

        assert_eq!(error.code(), ErrorCode::Conflict);
        assert!(error.to_string().contains("conversion running"));
    }

    #[test]
    fn test_static_root_absent() {
        let replies = replies(line(Uuid::new_v4(), STATIC_ROOT_METHOD, vec![]));
        assert_eq!(replies[0].clone().into_result().unwrap(), Value::Null);
    }
}
