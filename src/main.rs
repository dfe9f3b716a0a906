use anyhow::Context;
use clap::Parser;
use ssc_call::peer::WebRtcEngine;
use ssc_call::signaling::ws;
use ssc_call::{logger, Error, Session, SessionConfig, SessionEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Текстовый чат поверх data-channel в комнате relay
#[derive(Parser, Debug)]
#[command(name = "ssc-call", version, about)]
struct Args {
    /// JSON-файл с настройками сессии
    #[arg(short, long, env = "SSC_CONFIG")]
    config: Option<PathBuf>,

    /// Комната; перекрывает значение из файла
    #[arg(short, long)]
    room: Option<String>,

    /// Адрес relay, например ws://127.0.0.1:4000
    #[arg(short, long, env = "SSC_SIGNALING_URL")]
    signaling: Option<String>,

    /// Предпочитаемый кодек; можно указать несколько раз
    #[arg(long = "codec")]
    codecs: Vec<String>,
}

fn build_config(args: Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::new(args.room.clone().unwrap_or_default()),
    };
    if let Some(room) = args.room {
        config.room_id = room;
    }
    if let Some(url) = args.signaling {
        config.signaling_url = url;
    }
    if !args.codecs.is_empty() {
        config.preferred_codecs = args.codecs;
    }
    config.validate()?;
    Ok(config)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::DataChannelMessage { data, .. } => {
            println!("peer> {}", String::from_utf8_lossy(data));
        }
        SessionEvent::Status(status) => println!("* status: {status:?}"),
        SessionEvent::RelayNotice(message) => println!("* relay: {message}"),
        SessionEvent::DataChannelStateChanged { label, state } => {
            println!("* channel '{label}': {state:?}")
        }
        SessionEvent::Closed { reason } => println!("* call closed: {reason:?}"),
        other => tracing::debug!("{other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();
    let config = build_config(Args::parse())?;

    let link = ws::connect(&config.signaling_url)
        .await
        .with_context(|| format!("cannot reach relay at {}", config.signaling_url))?;
    let engine = Arc::new(WebRtcEngine::from_config(&config));
    let label = config.data_channel_label.clone();
    let (handle, mut events) = Session::join(config, link, engine)?;
    handle.open_data_channel(&label).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) if line.trim() == "/restart" => {
                    if let Err(e) = handle.restart_ice().await {
                        println!("* ICE restart refused: {e}");
                    }
                }
                Some(line) => {
                    if let Err(e) = handle.send_text(&label, &line).await {
                        println!("* not sent: {e}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    match handle.leave().await {
        Ok(()) | Err(Error::SessionGone) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
