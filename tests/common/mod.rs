#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::Result;
use futures::SinkExt;
use futures::StreamExt;
use sensor_keel::{
    actions::{self, Async, Response},
    config::Config,
    events::{Event, TimestampedEvent},
    mock::MockBench,
    ports::PortDescriptor,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, Level};

pub type Subscriber = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ARDUINO: &str = "/dev/ttyACM0";

pub fn arduino() -> PortDescriptor {
    PortDescriptor::with_manufacturer(ARDUINO, "Arduino (www.arduino.cc)")
}

/// Snappy timings, and no demo data unless a test asks for it.
pub fn quick_config() -> Config {
    let mut config = Config::default();

    config.timings.initial_connect_delay_ms = 10;
    config.timings.reconnect_interval_ms = 50;
    config.timings.health_check_interval_ms = 200;
    config.demo.enabled = false;

    config
}

/// The server makes no connection attempt of its own, so only requested ones happen.
pub fn idle_config() -> Config {
    let mut config = quick_config();

    config.timings.initial_connect_delay_ms = 60_000;
    config.timings.health_check_interval_ms = 60_000;

    config
}

/// Start a server backed by the bench, returning the port it listens on.
pub async fn start(config: Config, bench: &MockBench) -> Result<u16> {
    sensor_keel::logging::init(Level::DEBUG, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    let enumerator = bench.clone();
    let transport = bench.clone();
    tokio::spawn(async move {
        sensor_keel::server::run_any_port_with(config, enumerator, transport, port_tx).await
    });

    let port = port_rx.await?;
    info!("Server on port {port}");

    Ok(port)
}

pub async fn connect(port: u16) -> Result<Subscriber> {
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/client")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

pub async fn receive(client: &mut Subscriber) -> Result<actions::ResponseResult> {
    let response = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let response = response.to_text()?;
    let response = serde_json::from_str(response)?;

    Ok(response)
}

pub async fn send(client: &mut Subscriber, action: &actions::Action) -> Result<()> {
    client
        .send(tungstenite::Message::Text(action.serialize()))
        .await?;
    Ok(())
}

/// Skip events until a reply to a request shows up.
pub async fn reply(client: &mut Subscriber) -> Result<actions::ResponseResult> {
    loop {
        let response = receive(client).await?;

        if !matches!(response, Ok(Response::Async(_))) {
            return Ok(response);
        }
    }
}

/// Skip anything until an event matching the predicate shows up.
pub async fn event_where<F>(client: &mut Subscriber, mut predicate: F) -> Result<TimestampedEvent>
where
    F: FnMut(&Event) -> bool,
{
    loop {
        if let Ok(Response::Async(Async::Event(event))) = receive(client).await? {
            if predicate(&event.inner) {
                return Ok(event);
            }
        }
    }
}

/// A raw HTTP/1.1 request, returning the status code and body.
pub async fn http(port: u16, method: &str, path: &str, body: Option<&str>) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let body = body.unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Connection: close\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

    let code = response
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| color_eyre::eyre::eyre!("No status line in {response:?}"))?
        .parse()?;
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();

    Ok((code, body))
}

/// A request may cause an event which overtakes the reply. Wait for both.
pub async fn reply_and_event<F>(
    client: &mut Subscriber,
    mut predicate: F,
) -> Result<(actions::ResponseResult, TimestampedEvent)>
where
    F: FnMut(&Event) -> bool,
{
    let mut reply = None;
    let mut event = None;

    while reply.is_none() || event.is_none() {
        match receive(client).await? {
            Ok(Response::Async(Async::Event(e))) => {
                if event.is_none() && predicate(&e.inner) {
                    event = Some(e);
                }
            }
            other => reply = Some(other),
        }
    }

    match (reply, event) {
        (Some(reply), Some(event)) => Ok((reply, event)),
        _ => unreachable!(),
    }
}
