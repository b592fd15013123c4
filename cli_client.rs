use anyhow::{bail, Context};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use mukatte_protocol::{
    decode_payload, encode_payload, Identity, JoinResponse, ROOM_PARAM, SESSION_COOKIE,
    STATUS_PATH,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

#[derive(Parser, Debug)]
#[command(name = "cli_client")]
#[command(about = "Plays one side of a mento-mukatte room from the terminal")]
struct Args {
    /// Coordinator base URL
    #[arg(long, default_value = "http://localhost:3669")]
    server: String,

    /// Room to join
    #[arg(long)]
    room: String,

    /// Identity to play as; a fresh one is generated when omitted
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let token = match args.token {
        Some(t) => t,
        None => Identity::generate().to_string(),
    };
    let cookie = format!("{SESSION_COOKIE}={token}");
    let base = args.server.trim_end_matches('/');

    println!("🎮 mento-mukatte CLI");
    println!("🪪 Playing as {token}");

    let resp = reqwest::Client::new()
        .get(format!("{base}/"))
        .query(&[(ROOM_PARAM, args.room.as_str())])
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .await
        .with_context(|| format!("could not reach {base}"))?;
    if !resp.status().is_success() {
        bail!("join refused: {}", resp.status());
    }
    let view: JoinResponse = resp.json().await.context("malformed join response")?;

    println!("🚪 Joined room '{}'", args.room);
    println!("🃏 Your card: {}", view.your_card);
    println!("📋 Board:");
    for (i, card) in view.images.iter().enumerate() {
        println!("  {i:2}: {card}");
    }

    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let mut url = reqwest::Url::parse(&format!("{ws_base}{STATUS_PATH}"))
        .context("bad server url")?;
    url.query_pairs_mut().append_pair(ROOM_PARAM, &args.room);
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("cookie", HeaderValue::from_str(&cookie)?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("live connection refused")?;
    println!("✅ Connected, type a card index and press Enter (quit to exit)");

    let (mut write, mut read) = ws_stream.split();

    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match decode_payload(&text) {
                    Ok(payload) => {
                        println!("📨 Peer: {}", String::from_utf8_lossy(&payload))
                    }
                    Err(e) => println!("❓ Undecodable frame: {e}"),
                },
                Ok(Message::Close(_)) => {
                    println!("🔌 Connection closed by server");
                    break;
                }
                Err(e) => {
                    println!("❌ WebSocket error: {e}");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        write
            .send(Message::Text(encode_payload(line.as_bytes())))
            .await?;
    }

    let _ = write.close().await;
    println!("👋 Goodbye!");
    Ok(())
}
