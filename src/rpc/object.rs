//! Remotely callable objects
//!
//! Hosted objects dispatch calls by method name themselves, one explicit
//! match per object, so there is no reflection involved.

use super::envelope::Args;
use crate::utils::{AppError, AppResult};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

pub trait RpcObject: Send + Sync {
    /// Registration name; defaults to the last path segment of the type name
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_string()
    }

    /// Invoke `method` with the given arguments
    fn call(&self, method: &str, args: &Args) -> AppResult<Value>;

    /// Directory served to GET requests on this object's path, if any
    fn static_root(&self) -> Option<PathBuf> {
        None
    }

    fn unknown_method(&self, method: &str) -> AppError {
        AppError::UnknownMethod {
            object: self.name(),
            method: method.to_string(),
        }
    }
}

/// `a::b::Camera<x::Y>` -> `Camera`
pub fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Serialize a method result
pub fn to_json<T: Serialize>(value: T) -> AppResult<Value> {
    Ok(serde_json::to_value(value)?)
}
