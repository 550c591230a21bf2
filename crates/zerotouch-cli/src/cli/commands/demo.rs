//! `zerotouch demo` - bootstrap a device on an in-memory link.
//!
//! Builds two hosts on one multicast segment, runs the authentication server
//! on one and the device on the other, then plays the operator: hands the
//! server the PIN and waits for the device to install its certificate.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tracing::warn;
use zerotouch::observer::{FileTrace, TracingObserver};
use zerotouch::security::keychain;
use zerotouch::sim::{SimNetwork, SimNode};
use zerotouch::{
    AuthenticationServer, CommandTool, ControlResponse, DeviceController, DeviceState, Entity, Name,
    NodeConfig, PacketObserver, Pin,
};

use super::Context;
use crate::cli::args::DemoArgs;

/// What the operator learns from one run
#[derive(Debug, Serialize)]
struct DemoReport {
    code: u32,
    text: String,
    device_state: String,
    certificate: Option<String>,
    issuer: Option<String>,
    signed_by_server: bool,
}

pub async fn execute(ctx: Context, args: DemoArgs) -> Result<()> {
    let server_name: Name = args
        .server_name
        .as_deref()
        .unwrap_or_else(|| ctx.config.server_name())
        .parse()?;
    let device_name: Name = args
        .device_name
        .as_deref()
        .unwrap_or_else(|| ctx.config.device_name())
        .parse()?;
    let operator_name: Name = ctx.config.operator_name().parse()?;
    let node_config = ctx.config.node.clone();

    let observer: Arc<dyn PacketObserver> = match &ctx.packet_trace {
        Some(path) => Arc::new(FileTrace::open(path)?),
        None => Arc::new(TracingObserver),
    };

    let net = SimNetwork::new();
    let as_node = net.add_node("as");
    let dev_node = net.add_node("device");

    let server = AuthenticationServer::start(spawn_entity(
        &as_node,
        server_name,
        &node_config,
        &observer,
    ))
    .await?;
    let device = DeviceController::start(
        spawn_entity(&dev_node, device_name, &node_config, &observer),
        Pin::from(args.secret.as_str()),
        args.enable_discovery,
    )
    .await?;

    let (operator_face, _) = as_node.attach_app();
    let tool = CommandTool::new(operator_face, operator_name)
        .with_lifetime(node_config.command_lifetime())
        .with_observer(Arc::clone(&observer));
    let operator_pin = args.operator_secret.as_deref().unwrap_or(&args.secret);
    let response = tool.add_device(&Pin::from(operator_pin)).await;

    if response.is_success() {
        let limit = node_config.command_lifetime() + node_config.cert_fetch_lifetime();
        let mut states = device.subscribe();
        if tokio::time::timeout(limit, states.wait_for(|s| s.is_terminal()))
            .await
            .is_err()
        {
            warn!(state = ?device.state(), "device did not finish in time");
        }
    }

    let report = report(&server, &device, &response)?;
    server.entity().shutdown().await;
    device.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, ctx.verbose);
    }

    if !report.signed_by_server {
        anyhow::bail!("the device was not bootstrapped");
    }
    Ok(())
}

fn spawn_entity(
    node: &SimNode,
    name: Name,
    config: &NodeConfig,
    observer: &Arc<dyn PacketObserver>,
) -> Entity {
    let (face, incoming) = node.attach_app();
    let entity = Entity::builder(name, face, node.controller())
        .config(config.clone())
        .observer(Arc::clone(observer))
        .build();
    tokio::spawn(entity.clone().run(incoming));
    entity
}

fn report(
    server: &AuthenticationServer,
    device: &DeviceController,
    response: &ControlResponse,
) -> Result<DemoReport> {
    let state = device.state();
    let anchor = server.entity().default_certificate()?;
    let certificate = (state == DeviceState::Done)
        .then(|| device.entity().default_certificate())
        .transpose()?;

    let signed_by_server = certificate.as_ref().is_some_and(|c| {
        c.issuer() == Some(anchor.name()) && keychain::verify_data(c.data(), anchor.public_key())
    });
    Ok(DemoReport {
        code: response.code(),
        text: response.text().to_string(),
        device_state: format!("{state:?}"),
        certificate: certificate.as_ref().map(|c| c.name().to_string()),
        issuer: certificate
            .as_ref()
            .and_then(|c| c.issuer())
            .map(ToString::to_string),
        signed_by_server,
    })
}

fn print_report(report: &DemoReport, verbose: bool) {
    let status = format!("{} {}", report.code, report.text);
    let status = if report.code == ControlResponse::OK {
        status.green()
    } else {
        status.red()
    };
    println!("{} {}", "add-device:".bold(), status);
    println!("{} {}", "device state:".bold(), report.device_state);

    match (&report.certificate, report.signed_by_server) {
        (Some(name), true) => {
            println!("{} {}", "certificate:".bold(), name.cyan());
            if verbose {
                if let Some(issuer) = &report.issuer {
                    println!("{} {}", "signed by:".bold(), issuer);
                }
            }
            println!("{}", "The device is bootstrapped.".green().bold());
        }
        _ => println!("{}", "The device has no certificate from the server.".yellow()),
    }
}
