//! Object hosting
//!
//! `ObjectHost` builds hosted objects from a catalog of constructors, either
//! in this process or behind an `ObjectProxy` in a worker process, registers
//! them with a `Router` and runs their lifecycle hooks.

use super::envelope::Args;
use super::object::RpcObject;
use super::proxy::{ObjectProxy, WorkerCommand};
use super::router::{Hooks, RegistrationId, Router};
use crate::utils::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds a hosted object from its constructor arguments
pub type Constructor = Arc<dyn Fn(&Args) -> AppResult<Arc<dyn RpcObject>> + Send + Sync>;

/// Constructors by kind. Worker processes build from the same catalog.
#[derive(Default, Clone)]
pub struct Catalog {
    constructors: HashMap<String, Constructor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&Args) -> AppResult<Arc<dyn RpcObject>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn construct(&self, kind: &str, args: &Args) -> AppResult<Arc<dyn RpcObject>> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| AppError::bad_request(format!("Unknown object kind '{}'", kind)))?;
        constructor(args)
    }
}

/// One object to host
pub struct HostSpec {
    pub kind: String,
    pub pattern: String,
    pub args: Args,
    pub hooks: Hooks,
    pub isolated: bool,
}

impl HostSpec {
    pub fn new(kind: &str, pattern: &str) -> Self {
        Self {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
            args: Args::default(),
            hooks: Hooks::none(),
            isolated: false,
        }
    }

    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub worker: WorkerCommand,
    pub call_timeout: Duration,
}

struct Hosted {
    id: RegistrationId,
    proxy: Option<Arc<ObjectProxy>>,
}

pub struct ObjectHost {
    catalog: Catalog,
    options: HostOptions,
    hosted: Mutex<Vec<Hosted>>,
}

impl ObjectHost {
    pub fn new(catalog: Catalog, options: HostOptions) -> Self {
        Self {
            catalog,
            options,
            hosted: Mutex::new(Vec::new()),
        }
    }

    /// Construct, register and initialise one object.
    ///
    /// A failing init hook leaves the object registered so that
    /// `shutdown_all` still tears it down.
    pub fn host(&self, router: &mut Router, spec: HostSpec) -> AppResult<RegistrationId> {
        let (handle, proxy): (Arc<dyn RpcObject>, Option<Arc<ObjectProxy>>) = if spec.isolated {
            let proxy = Arc::new(ObjectProxy::spawn(
                &self.options.worker,
                &spec.kind,
                &spec.args,
                self.options.call_timeout,
            )?);
            let handle: Arc<dyn RpcObject> = proxy.clone();
            (handle, Some(proxy))
        } else {
            (self.catalog.construct(&spec.kind, &spec.args)?, None)
        };

        let id = router.register(&spec.pattern, handle, spec.hooks)?;
        self.hosted.lock().push(Hosted { id, proxy });

        tracing::info!(
            "Hosted {} at {}{}",
            spec.kind,
            spec.pattern,
            if spec.isolated { " (isolated)" } else { "" }
        );
        router.run_init(id)?;
        Ok(id)
    }

    /// Run every deinit hook, then stop every worker, newest first.
    ///
    /// Failures are logged and returned; they never cut the teardown short.
    /// Later calls find nothing left to do.
    pub fn shutdown_all(&self, router: &Router) -> Vec<AppError> {
        let mut hosted = std::mem::take(&mut *self.hosted.lock());
        hosted.reverse();
        let mut errors = Vec::new();

        for entry in &hosted {
            if let Err(error) = router.run_deinit(entry.id) {
                let name = router.get(entry.id).map(|r| r.name()).unwrap_or("?");
                tracing::error!("Deinit of {} failed: {}", name, error);
                errors.push(error);
            }
        }

        for proxy in hosted.iter().filter_map(|entry| entry.proxy.as_ref()) {
            if let Err(error) = proxy.terminate() {
                tracing::error!("Failed to stop worker {}: {}", proxy.name(), error);
                errors.push(error);
            }
        }

        tracing::info!("Shut down {} hosted objects", hosted.len());
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::object::to_json;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    struct Journal {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_stop: bool,
    }

    impl RpcObject for Journal {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn call(&self, method: &str, _args: &Args) -> AppResult<Value> {
            self.log.lock().push(format!("{}.{}", self.name, method));
            match method {
                "stop" if self.fail_stop => Err(AppError::Command("stuck".into())),
                "start" | "stop" | "ping" => to_json(true),
                _ => Err(self.unknown_method(method)),
            }
        }
    }

    fn host_with(log: &Arc<Mutex<Vec<String>>>) -> ObjectHost {
        let mut catalog = Catalog::new();
        for (kind, fail_stop) in [("first", true), ("second", false)] {
            let log = log.clone();
            catalog.insert(kind, move |_args: &Args| {
                Ok(Arc::new(Journal {
                    name: kind.to_string(),
                    log: log.clone(),
                    fail_stop,
                }) as Arc<dyn RpcObject>)
            });
        }
        ObjectHost::new(
            catalog,
            HostOptions {
                worker: WorkerCommand {
                    program: PathBuf::from("/nonexistent"),
                    args: Vec::new(),
                },
                call_timeout: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn test_host_registers_and_runs_init() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host_with(&log);
        let mut router = Router::new();

        let id = host
            .host(&mut router, HostSpec::new("first", r"^/first/").hooks(Hooks::start_stop()))
            .unwrap();

        assert_eq!(*log.lock(), vec!["first.start"]);
        assert_eq!(router.route("/first/").map(|r| r.id()), Some(id));
        let response: Value =
            serde_json::from_slice(&router.dispatch("/first/", br#"{"method": "ping"}"#)).unwrap();
        assert_eq!(response, json!({"type": "result", "result": true}));
    }

    #[test]
    fn test_shutdown_runs_all_deinits_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host_with(&log);
        let mut router = Router::new();

        host.host(&mut router, HostSpec::new("first", r"^/first/").hooks(Hooks::start_stop()))
            .unwrap();
        host.host(&mut router, HostSpec::new("second", r"^/second/").hooks(Hooks::start_stop()))
            .unwrap();
        log.lock().clear();

        let errors = host.shutdown_all(&router);
        assert_eq!(errors.len(), 1);
        assert_eq!(*log.lock(), vec!["second.stop", "first.stop"]);

        assert!(host.shutdown_all(&router).is_empty());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host_with(&log);
        let mut router = Router::new();

        let result = host.host(&mut router, HostSpec::new("third", r"^/third/"));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(router.is_empty());
    }

    #[test]
    fn test_isolated_spawn_failure_registers_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host_with(&log);
        let mut router = Router::new();

        let result = host.host(&mut router, HostSpec::new("first", r"^/first/").isolated(true));
        assert!(matches!(result, Err(AppError::Proxy(_))));
        assert!(router.is_empty());
    }
}
