//! Wire envelopes
//!
//! Request: `{method, args?, kwargs?}`.
//! Response: `{type: "result", result}` or `{type: "error", error}`.

use crate::utils::{AppError, AppResult, ErrorCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Positional and keyword arguments of a call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Args {
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    /// Reject arguments beyond the parameters a method declares
    pub fn check(&self, params: &[&str]) -> AppResult<()> {
        if self.args.len() > params.len() {
            return Err(AppError::bad_request(format!(
                "Expected at most {} positional arguments, got {}",
                params.len(),
                self.args.len()
            )));
        }
        if let Some(unknown) = self.kwargs.keys().find(|k| !params.contains(&k.as_str())) {
            return Err(AppError::bad_request(format!("Unexpected keyword argument '{}'", unknown)));
        }
        Ok(())
    }

    /// Parameter `name` at position `index`, given either way but not both
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> AppResult<Option<T>> {
        let value = match (self.args.get(index), self.kwargs.get(name)) {
            (Some(_), Some(_)) => {
                return Err(AppError::bad_request(format!(
                    "Argument '{}' given both positionally and by keyword",
                    name
                )))
            }
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => return Ok(None),
        };

        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| AppError::bad_request(format!("Invalid argument '{}': {}", name, e)))
    }

    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> AppResult<T> {
        self.get(index, name)?
            .ok_or_else(|| AppError::bad_request(format!("Missing required argument '{}'", name)))
    }

    pub fn get_or<T: DeserializeOwned>(&self, index: usize, name: &str, default: T) -> AppResult<T> {
        Ok(self.get(index, name)?.unwrap_or(default))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(flatten)]
    pub args: Args,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Args) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub fn decode(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::bad_request(format!("Malformed request envelope: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Result {
        #[serde(default)]
        result: Value,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn from_result(result: &AppResult<Value>) -> Self {
        match result {
            Ok(value) => Response::Result {
                result: value.clone(),
            },
            Err(error) => Response::error(error.to_string()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","error":"Failed to encode response: {}"}}"#, e).into_bytes()
        })
    }

    pub fn decode(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::bad_request(format!("Malformed response envelope: {}", e)))
    }

    /// Client-side view of the response; `code` classifies a relayed error
    pub fn into_result(self, code: Option<ErrorCode>) -> AppResult<Value> {
        match self {
            Response::Result { result } => Ok(result),
            Response::Error { error } => Err(AppError::Remote {
                code: code.unwrap_or(ErrorCode::Internal),
                message: error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_optional_fields() {
        let request = Request::decode(br#"{"method": "get_config"}"#).unwrap();
        assert_eq!(request.method, "get_config");
        assert!(request.args.args.is_empty());
        assert!(request.args.kwargs.is_empty());

        let request =
            Request::decode(br#"{"method": "set_config", "args": [{"durationMs": 1}], "kwargs": {"merge": true}}"#)
                .unwrap();
        assert_eq!(request.args.args, vec![json!({"durationMs": 1})]);
        assert_eq!(request.args.kwargs["merge"], json!(true));
    }

    #[test]
    fn test_malformed_request_is_bad_request() {
        for body in [&b"not json"[..], br#"{"args": []}"#, br#"{"method": 3}"#] {
            assert!(matches!(Request::decode(body), Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = Response::from_result(&Ok(json!([1, 2])));
        let err = Response::from_result(&Err(AppError::AlreadyRecording));

        assert_eq!(
            serde_json::from_slice::<Value>(&ok.encode()).unwrap(),
            json!({"type": "result", "result": [1, 2]})
        );
        assert_eq!(
            serde_json::from_slice::<Value>(&err.encode()).unwrap(),
            json!({"type": "error", "error": "Already recording"})
        );
    }

    #[test]
    fn test_nested_result_survives_round_trip() {
        let value = json!({
            "a": [1, {"b": [true, null, "x"]}],
            "c": {"d": {"e": 2.5}},
        });

        let decoded = Response::decode(&Response::from_result(&Ok(value.clone())).encode())
            .unwrap()
            .into_result(None)
            .unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn test_args_lookup() {
        let args = Args {
            args: vec![json!({"x": 1})],
            kwargs: [("merge".to_string(), json!(true))].into_iter().collect(),
        };

        assert!(args.check(&["patch", "merge", "persist"]).is_ok());
        assert!(args.check(&["patch"]).is_err());
        assert_eq!(args.required::<Value>(0, "patch").unwrap(), json!({"x": 1}));
        assert!(args.get_or(1, "merge", false).unwrap());
        assert!(!args.get_or(2, "persist", false).unwrap());
        assert!(args.required::<bool>(2, "persist").is_err());
        assert!(args.get::<bool>(0, "merge").is_err());
    }
}
