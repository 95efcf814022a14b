//! Connects to an echo server, sends a few messages and prints the replies.
//!
//! ```text
//! cargo run -p echo-client -- [host] [port] [tcp|udp|http]
//! RUST_LOG=tether=debug cargo run -p echo-client
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tether::prelude::*;
use tracing::info;

const MESSAGES: usize = 5;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

struct Args {
    host: String,
    port: u16,
    protocol: TransportProtocol,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => 8012,
    };
    let protocol = match args.next().as_deref() {
        None | Some("tcp") => TransportProtocol::Tcp,
        Some("udp") => TransportProtocol::Udp,
        Some("http") => TransportProtocol::Http,
        Some(other) => return Err(format!("unknown protocol {other:?}").into()),
    };
    Ok(Args { host, port, protocol })
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tether::init_tracing("tether=info,echo_client=info")?;
    let args = parse_args()?;

    let mut session = Session::builder(&args.host)
        .option(SessionOption {
            reliability: false,
            send_session_id_only_once: false,
        })
        .build()?;

    let replies = Arc::new(AtomicUsize::new(0));

    session.on_session_event(|protocol, event, id| {
        info!(%protocol, ?event, session_id = %id, "session event");
    });
    session.on_transport_event(|protocol, event| {
        info!(%protocol, ?event, "transport event");
    });
    let r = Arc::clone(&replies);
    session.on_json_recv(move |protocol, msg_type, body| {
        if msg_type == "echo" {
            r.fetch_add(1, Ordering::Relaxed);
            println!("[{protocol}] {}", serde_json::Value::Object(body.clone()));
        }
    });

    session.connect(args.protocol, args.port, Encoding::Json)?;
    for n in 0..MESSAGES {
        let body = json!({ "message": format!("hello world #{n}") });
        session.send_message("echo", &body.to_string())?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while replies.load(Ordering::Relaxed) < MESSAGES {
        if tokio::time::Instant::now() >= deadline {
            eprintln!("gave up after {} of {MESSAGES} replies", replies.load(Ordering::Relaxed));
            break;
        }
        session.update();
        tokio::time::sleep(Duration::from_millis(16)).await;
    }

    session.close();
    for _ in 0..10 {
        session.update();
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
    Ok(())
}
