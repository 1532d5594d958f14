//! Command line

use crate::config::default_config_dir;
use crate::node::{NodeKind, NodeSettings};
use crate::recorder::SchedulerOptions;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pi-monitor")]
#[command(about = "Headless camera and microphone recording node")]
#[command(version)]
#[command(subcommand_required = false)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address to listen on
    #[arg(long, global = true, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, global = true, default_value = "8000")]
    pub port: u16,

    /// Directory holding camera.json and mic.json (default: ~/.pi_monitor/config)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Host the recording schedulers in worker processes
    #[arg(long, global = true)]
    pub isolate: bool,

    /// Upper bound on one call into a worker process
    #[arg(long, global = true, default_value = "10000")]
    pub call_timeout_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Camera node with system and file management (default)
    Monitor,

    /// Camera node, same objects as monitor
    Camera,

    /// Camera and microphone node
    Avmonitor,

    /// Serve one object over stdin/stdout for a parent node
    #[command(hide = true)]
    Worker {
        /// Object kind to construct
        kind: String,

        /// Constructor arguments as a JSON envelope
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

impl Cli {
    pub fn node_kind(&self) -> Option<NodeKind> {
        match &self.command {
            None | Some(Commands::Monitor) => Some(NodeKind::Monitor),
            Some(Commands::Camera) => Some(NodeKind::Camera),
            Some(Commands::Avmonitor) => Some(NodeKind::Avmonitor),
            Some(Commands::Worker { .. }) => None,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            config_dir: self.config_dir.clone().unwrap_or_else(default_config_dir),
            isolate: self.isolate,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            scheduler_options: SchedulerOptions::default(),
        }
    }

    /// Arguments a worker needs ahead of `<kind> --args <json>` to rebuild
    /// this process's settings
    pub fn worker_prefix(&self) -> Vec<OsString> {
        vec![
            "--config-dir".into(),
            self.settings().config_dir.into_os_string(),
            "--call-timeout-ms".into(),
            self.call_timeout_ms.to_string().into(),
            "worker".into(),
        ]
    }
}
