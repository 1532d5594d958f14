//! Node assembly
//!
//! Which objects a node hosts, and how each one is constructed. The same
//! catalog serves the node process and its worker processes.

use crate::commands::{FileSystem, SystemControl};
use crate::config::ConfigStore;
use crate::device::{Device, MediaKind, SimulatedDevice};
use crate::recorder::{RecordingScheduler, SchedulerOptions};
use crate::rpc::{Args, Catalog, HostSpec, Hooks, ObjectHost, RpcObject, Router};
use crate::utils::AppResult;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Monitor,
    Camera,
    Avmonitor,
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub config_dir: PathBuf,
    pub isolate: bool,
    pub call_timeout: Duration,
    pub scheduler_options: SchedulerOptions,
}

/// Opens the device for a medium
pub type DeviceFactory = Arc<dyn Fn(MediaKind) -> AppResult<Arc<dyn Device>> + Send + Sync>;

/// Devices for nodes without camera or microphone drivers
pub fn simulated_devices() -> DeviceFactory {
    Arc::new(|kind| Ok(Arc::new(SimulatedDevice::new(kind)) as Arc<dyn Device>))
}

pub fn catalog(settings: &NodeSettings, devices: DeviceFactory) -> Catalog {
    let mut catalog = Catalog::new();

    for (kind, medium) in [("camera", MediaKind::Video), ("mic", MediaKind::Audio)] {
        let devices = devices.clone();
        let store = ConfigStore::in_dir(&settings.config_dir, kind);
        let options = settings.scheduler_options.clone();
        catalog.insert(kind, move |args: &Args| {
            args.check(&[])?;
            let scheduler = RecordingScheduler::new(devices(medium)?, Some(store.clone()), options.clone())?;
            Ok(Arc::new(scheduler) as Arc<dyn RpcObject>)
        });
    }

    catalog.insert("system", |args: &Args| {
        args.check(&[])?;
        Ok(Arc::new(SystemControl::new()) as Arc<dyn RpcObject>)
    });
    catalog.insert("filesystem", |args: &Args| {
        args.check(&[])?;
        Ok(Arc::new(FileSystem::new()) as Arc<dyn RpcObject>)
    });

    catalog
}

/// Objects hosted by a node of `kind`, in registration order
pub fn objects(kind: NodeKind, isolate: bool) -> Vec<HostSpec> {
    let mut specs = vec![HostSpec::new("camera", r"^/camera/")
        .hooks(Hooks::start_stop())
        .isolated(isolate)];

    if kind == NodeKind::Avmonitor {
        specs.push(
            HostSpec::new("mic", r"^/mic/")
                .hooks(Hooks::start_stop())
                .isolated(isolate),
        );
    }

    specs.push(HostSpec::new("system", r"^/system/"));
    specs.push(HostSpec::new("filesystem", r"^/filesystem/"));
    specs
}

/// Host every object of a `kind` node. On failure whatever was already
/// hosted is shut down again.
pub fn host_node(kind: NodeKind, isolate: bool, host: &ObjectHost, router: &mut Router) -> AppResult<()> {
    for spec in objects(kind, isolate) {
        if let Err(error) = host.host(router, spec) {
            for failure in host.shutdown_all(router) {
                tracing::warn!("Cleanup after failed startup: {}", failure);
            }
            return Err(error);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{HostOptions, WorkerCommand};
    use serde_json::{json, Value};

    fn settings(dir: &std::path::Path) -> NodeSettings {
        NodeSettings {
            config_dir: dir.to_path_buf(),
            isolate: false,
            call_timeout: Duration::from_secs(1),
            scheduler_options: SchedulerOptions::default(),
        }
    }

    fn object_host(settings: &NodeSettings) -> ObjectHost {
        ObjectHost::new(
            catalog(settings, simulated_devices()),
            HostOptions {
                worker: WorkerCommand {
                    program: PathBuf::from("/nonexistent"),
                    args: Vec::new(),
                },
                call_timeout: settings.call_timeout,
            },
        )
    }

    #[test]
    fn test_node_objects() {
        let names = |kind| {
            objects(kind, false)
                .into_iter()
                .map(|spec| spec.kind)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(NodeKind::Monitor), vec!["camera", "system", "filesystem"]);
        assert_eq!(names(NodeKind::Camera), names(NodeKind::Monitor));
        assert_eq!(names(NodeKind::Avmonitor), vec!["camera", "mic", "system", "filesystem"]);
    }

    #[test]
    fn test_avmonitor_hosts_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = object_host(&settings);
        let mut router = Router::new();

        host_node(NodeKind::Avmonitor, false, &host, &mut router).unwrap();

        let names: Vec<&str> = router.registrations().map(|r| r.name()).collect();
        assert_eq!(names, vec!["CameraScheduler", "MicScheduler", "SystemControl", "FileSystem"]);

        let response: Value =
            serde_json::from_slice(&router.dispatch("/mic/", br#"{"method": "get_config"}"#)).unwrap();
        assert_eq!(response["result"]["filenameTemplate"], json!("{host}_{date}_{time}_{index}"));

        let response: Value =
            serde_json::from_slice(&router.dispatch("/system/", br#"{"method": "get_date"}"#)).unwrap();
        assert_eq!(response["type"], "result");

        assert!(host.shutdown_all(&router).is_empty());
    }

    #[test]
    fn test_scheduler_config_comes_from_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        ConfigStore::in_dir(dir.path(), "camera")
            .save(&json!({"splitIntervalMs": 60000}))
            .unwrap();
        let settings = settings(dir.path());

        let camera = catalog(&settings, simulated_devices())
            .construct("camera", &Args::default())
            .unwrap();
        let config = camera.call("get_config", &Args::default()).unwrap();

        assert_eq!(config["splitIntervalMs"], 60000);
        assert_eq!(config["timestampPeriodMs"], 30000);
    }
}
