//! BSU CSI driver entrypoint.
//!
//! Serves the CSI services over a local UNIX socket; `--mode` selects which
//! of the controller and node services are registered next to the identity
//! service.

use anyhow::Context;
use csi_driver::{
    controller::ControllerService,
    csi::{
        controller_server::ControllerServer, identity_server::IdentityServer,
        node_server::NodeServer,
    },
    identity::IdentityService,
    metadata::{HttpMetadataService, MetadataService, REGION_ENV},
    node::NodeService,
};
use futures::TryFutureExt;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::Path,
    pin::Pin,
    str::FromStr,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};
use structopt::StructOpt;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::UnixListener,
};
use tonic::transport::{server::Connected, Server};

#[derive(Debug, StructOpt)]
#[structopt(name = "bsu-csi-driver", about = "CSI driver for Outscale BSU volumes")]
struct CliArgs {
    /// The CSI endpoint to serve on
    /// (only the unix schema is supported)
    #[structopt(
        long,
        default_value = "unix:///var/lib/kubelet/plugins/bsu.csi.outscale.com/csi.sock"
    )]
    endpoint: String,

    /// Which CSI services to register: controller, node or all
    #[structopt(long, default_value = "all")]
    mode: Mode,

    /// Extra tags applied to every created volume, as key=value
    #[structopt(long = "extra-volume-tags", parse(try_from_str = parse_key_value))]
    extra_volume_tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Mode {
    Controller,
    Node,
    All,
}

impl Mode {
    fn controller(&self) -> bool {
        matches!(self, Mode::Controller | Mode::All)
    }
    fn node(&self) -> bool {
        matches!(self, Mode::Node | Mode::All)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "controller" => Ok(Mode::Controller),
            "node" => Ok(Mode::Node),
            "all" => Ok(Mode::All),
            other => Err(format!(
                "unknown mode '{}', expected controller, node or all",
                other
            )),
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("'{}' is not a key=value pair", raw)),
    }
}

/// Socket wrapper implementing tonic's `Connected` for UDS serving.
#[derive(Clone, Debug)]
pub struct UdsConnectInfo {
    pub peer_addr: Option<Arc<tokio::net::unix::SocketAddr>>,
    pub peer_cred: Option<tokio::net::unix::UCred>,
}

#[derive(Debug)]
struct UnixStream(tokio::net::UnixStream);

impl Connected for UnixStream {
    type ConnectInfo = UdsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        UdsConnectInfo {
            peer_addr: self.0.peer_addr().ok().map(Arc::new),
            peer_cred: self.0.peer_cred().ok(),
        }
    }
}

impl AsyncRead for UnixStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::from_args();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), options = ?args, "starting");
    serve(args).await
}

async fn serve(args: CliArgs) -> anyhow::Result<()> {
    let socket_path = args
        .endpoint
        .strip_prefix("unix://")
        .with_context(|| format!("only unix:// endpoints are supported, got '{}'", args.endpoint))?
        .to_string();

    let controller = if args.mode.controller() {
        Some(controller_service(&args).await?)
    } else {
        None
    };
    let node = if args.mode.node() {
        let metadata = HttpMetadataService::new()
            .fetch()
            .await
            .context("reading instance metadata")?;
        tracing::info!(instance = %metadata.instance_id, zone = %metadata.availability_zone, "node identity");
        Some(NodeService::new(&metadata))
    } else {
        None
    };

    if let Some(parent) = Path::new(&socket_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    // a previous instance may have left its socket behind
    match std::fs::remove_file(&socket_path) {
        Ok(()) => tracing::info!(socket = %socket_path, "removed stale socket"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error).with_context(|| format!("removing stale socket '{}'", socket_path))
        }
    }

    let uds = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding '{}'", socket_path))?;
    tracing::info!(socket = %socket_path, mode = ?args.mode, "csi server listening");
    let incoming = async_stream::stream! {
        loop {
            let item = uds.accept().map_ok(|(stream, _)| UnixStream(stream)).await;
            yield item;
        }
    };

    Server::builder()
        .add_service(IdentityServer::new(IdentityService::new()))
        .add_optional_service(controller.map(ControllerServer::new))
        .add_optional_service(node.map(NodeServer::new))
        .serve_with_incoming_shutdown(incoming, shutdown_signal())
        .await
        .context("csi server failed")?;
    tracing::info!("csi server stopped");
    Ok(())
}

async fn controller_service(args: &CliArgs) -> anyhow::Result<ControllerService> {
    let credentials =
        cloud::api::sign::Credentials::from_env().context("reading api credentials")?;
    let region = match std::env::var(REGION_ENV) {
        Ok(region) if !region.is_empty() => region,
        _ => HttpMetadataService::new()
            .fetch()
            .await
            .context("resolving the region from instance metadata")?
            .region(),
    };
    let api = cloud::api::HttpOscApi::new(&region, credentials)?;
    let cloud = cloud::Cloud::new(Arc::new(api), &region);
    let extra_volume_tags: HashMap<String, String> =
        args.extra_volume_tags.iter().cloned().collect();
    Ok(ControllerService::new(cloud, extra_volume_tags))
}

async fn shutdown_signal() {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(error) => {
                tracing::error!(error = %error, "failed to install the SIGTERM handler");
                // fall back to ctrl-c only
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
}
