//! Path-pattern routing of RPC calls
//!
//! Registrations are tried in the order they were added and the first
//! pattern that matches at the start of the path wins. The router is filled
//! once at startup and only read while serving.

use super::envelope::{Args, Request, Response};
use super::object::RpcObject;
use crate::utils::{AppError, AppResult};
use regex::Regex;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Lifecycle hook run against a registered handle
pub type Hook = Box<dyn Fn(&dyn RpcObject) -> AppResult<()> + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    pub init: Option<Hook>,
    pub deinit: Option<Hook>,
}

impl Hooks {
    pub fn none() -> Self {
        Self::default()
    }

    /// Hooks calling the object's `start` and `stop` methods
    pub fn start_stop() -> Self {
        Self {
            init: Some(Box::new(|object: &dyn RpcObject| {
                object.call("start", &Args::default()).map(|_| ())
            })),
            deinit: Some(Box::new(|object: &dyn RpcObject| {
                object.call("stop", &Args::default()).map(|_| ())
            })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(usize);

pub struct Registration {
    id: RegistrationId,
    name: String,
    pattern: Regex,
    handle: Arc<dyn RpcObject>,
    hooks: Hooks,
}

impl Registration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<dyn RpcObject> {
        &self.handle
    }

    /// Length of the pattern match if it starts at the beginning of `path`
    fn match_len(&self, path: &str) -> Option<usize> {
        self.pattern
            .find(path)
            .filter(|m| m.start() == 0)
            .map(|m| m.end())
    }

    fn invoke(&self, request: &Request) -> AppResult<Value> {
        tracing::debug!("{}: calling {}({:?})", self.name, request.method, request.args);
        panic::catch_unwind(AssertUnwindSafe(|| self.handle.call(&request.method, &request.args)))
            .unwrap_or_else(|_| {
                Err(AppError::Command(format!(
                    "{}.{} panicked",
                    self.name, request.method
                )))
            })
    }
}

#[derive(Default)]
pub struct Router {
    registrations: Vec<Registration>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `pattern`.
    ///
    /// Fails if another registration already uses the handle's name.
    pub fn register(
        &mut self,
        pattern: &str,
        handle: Arc<dyn RpcObject>,
        hooks: Hooks,
    ) -> AppResult<RegistrationId> {
        let name = handle.name();
        if self.registrations.iter().any(|r| r.name == name) {
            return Err(AppError::DuplicateName(name));
        }
        let pattern = Regex::new(pattern)
            .map_err(|e| AppError::bad_request(format!("Invalid path pattern '{}': {}", pattern, e)))?;

        let id = RegistrationId(self.registrations.len());
        tracing::debug!("Registering {} at path {}", name, pattern);
        self.registrations.push(Registration {
            id,
            name,
            pattern,
            handle,
            hooks,
        });
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn registrations(&self) -> impl DoubleEndedIterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub fn get(&self, id: RegistrationId) -> Option<&Registration> {
        self.registrations.get(id.0)
    }

    /// First registration whose pattern matches `path`
    pub fn route(&self, path: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.match_len(path).is_some())
    }

    /// Handle one call. Never fails: every problem becomes an error
    /// envelope.
    pub fn dispatch(&self, path: &str, body: &[u8]) -> Vec<u8> {
        let result = match self.route(path) {
            Some(registration) => {
                Request::decode(body).and_then(|request| registration.invoke(&request))
            }
            None => Err(AppError::bad_request(format!("No handler for path {}", path))),
        };

        if let Err(error) = &result {
            tracing::warn!("{} failed: {}", path, error);
        }
        Response::from_result(&result).encode()
    }

    /// File under the matched handle's static root that a GET on `path`
    /// refers to; `None` if the handle serves no files.
    pub fn static_file(&self, path: &str) -> Option<AppResult<PathBuf>> {
        let registration = self.route(path)?;
        let root = registration.handle.static_root()?;
        let matched = registration.match_len(path).unwrap_or(0);
        Some(resolve_static(&root, &path[matched..]))
    }

    pub fn run_init(&self, id: RegistrationId) -> AppResult<()> {
        self.run_hook(id, |hooks| hooks.init.as_ref(), "init")
    }

    pub fn run_deinit(&self, id: RegistrationId) -> AppResult<()> {
        self.run_hook(id, |hooks| hooks.deinit.as_ref(), "deinit")
    }

    fn run_hook(
        &self,
        id: RegistrationId,
        select: impl Fn(&Hooks) -> Option<&Hook>,
        label: &str,
    ) -> AppResult<()> {
        let registration = self
            .get(id)
            .ok_or_else(|| AppError::bad_request(format!("Unknown registration {:?}", id)))?;
        match select(&registration.hooks) {
            Some(hook) => {
                tracing::debug!("{} {}", label, registration.name);
                hook(registration.handle.as_ref())
            }
            None => Ok(()),
        }
    }
}

fn resolve_static(root: &Path, relative: &str) -> AppResult<PathBuf> {
    let decoded = urlencoding::decode(relative)
        .map_err(|e| AppError::bad_request(format!("Invalid path encoding: {}", e)))?;
    let relative = Path::new(decoded.trim_start_matches('/'));

    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(AppError::bad_request(format!(
            "Path {:?} escapes the static root",
            relative
        )));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::object::to_json;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Counter {
        count: Mutex<i64>,
    }

    impl RpcObject for Counter {
        fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
            match method {
                "add" => {
                    args.check(&["amount"])?;
                    let amount: i64 = args.get_or(0, "amount", 1)?;
                    let mut count = self.count.lock();
                    *count += amount;
                    to_json(*count)
                }
                "explode" => panic!("boom"),
                _ => Err(self.unknown_method(method)),
            }
        }
    }

    struct Files(PathBuf);

    impl RpcObject for Files {
        fn call(&self, method: &str, _args: &Args) -> AppResult<Value> {
            Err(self.unknown_method(method))
        }

        fn static_root(&self) -> Option<PathBuf> {
            Some(self.0.clone())
        }
    }

    fn counter() -> Arc<dyn RpcObject> {
        Arc::new(Counter {
            count: Mutex::new(0),
        })
    }

    fn call(router: &Router, path: &str, body: Value) -> Value {
        let bytes = router.dispatch(path, body.to_string().as_bytes());
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_dispatch_positional_and_keyword() {
        let mut router = Router::new();
        router.register(r"^/counter/", counter(), Hooks::none()).unwrap();

        assert_eq!(
            call(&router, "/counter/", json!({"method": "add", "args": [2]})),
            json!({"type": "result", "result": 2})
        );
        assert_eq!(
            call(&router, "/counter/x", json!({"method": "add", "kwargs": {"amount": 3}})),
            json!({"type": "result", "result": 5})
        );
    }

    #[test]
    fn test_unknown_method_does_not_break_router() {
        let mut router = Router::new();
        router.register(r"^/counter/", counter(), Hooks::none()).unwrap();

        let response = call(&router, "/counter/", json!({"method": "frobnicate"}));
        assert_eq!(response["type"], "error");
        assert!(response["error"].as_str().unwrap().contains("frobnicate"));

        let response = call(&router, "/counter/", json!({"method": "add"}));
        assert_eq!(response["type"], "result");
    }

    #[test]
    fn test_errors_become_envelopes() {
        let mut router = Router::new();
        router.register(r"^/counter/", counter(), Hooks::none()).unwrap();

        let bytes = router.dispatch("/counter/", b"{not json");
        let response: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response["type"], "error");

        let response = call(&router, "/nothing/", json!({"method": "add"}));
        assert!(response["error"].as_str().unwrap().contains("No handler"));

        let response = call(&router, "/counter/", json!({"method": "explode"}));
        assert_eq!(response["type"], "error");

        let response = call(&router, "/counter/", json!({"method": "add", "kwargs": {"bogus": 1}}));
        assert_eq!(response["type"], "error");
    }

    #[test]
    fn test_first_registration_wins() {
        let mut router = Router::new();
        let first = router.register(r"^/a", counter(), Hooks::none()).unwrap();
        let second = router
            .register(r"^/a/b", Arc::new(Files(PathBuf::from("/tmp"))), Hooks::none())
            .unwrap();

        assert_eq!(router.route("/a/b").map(|r| r.id()), Some(first));
        assert_ne!(first, second);
        assert!(router.route("/x/a").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut router = Router::new();
        router.register(r"^/one/", counter(), Hooks::none()).unwrap();

        let result = router.register(r"^/two/", counter(), Hooks::none());
        assert!(matches!(result, Err(AppError::DuplicateName(name)) if name == "Counter"));
    }

    #[test]
    fn test_static_files_resolve_under_root() {
        let mut router = Router::new();
        router
            .register(r"^/videos/", Arc::new(Files(PathBuf::from("/data"))), Hooks::none())
            .unwrap();
        router.register(r"^/counter/", counter(), Hooks::none()).unwrap();

        assert_eq!(
            router.static_file("/videos/a%20b.h264").unwrap().unwrap(),
            PathBuf::from("/data/a b.h264")
        );
        assert!(router.static_file("/videos/../etc/passwd").unwrap().is_err());
        assert!(router.static_file("/counter/x").is_none());
    }

    #[test]
    fn test_hooks_run_against_handle() {
        let mut router = Router::new();
        let hooks = Hooks {
            init: Some(Box::new(|object: &dyn RpcObject| {
                object
                    .call("add", &Args::positional(vec![json!(10)]))
                    .map(|_| ())
            })),
            deinit: None,
        };
        let id = router.register(r"^/counter/", counter(), hooks).unwrap();

        router.run_init(id).unwrap();
        router.run_deinit(id).unwrap();

        assert_eq!(
            call(&router, "/counter/", json!({"method": "add", "args": [0]})),
            json!({"type": "result", "result": 10})
        );
    }
}
