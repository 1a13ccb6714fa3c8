//! Standalone command-line tool: one-shot discovery, or a single
//! query/control exchange against one device. Shares the codec and message
//! modules with the daemon but no other state — no config file, no device
//! table, no controller.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tuya_lan::messages;
use tuya_lan::protocol::{self, Secret, Version, CONTROL, QUERY};

const DISCOVERY_LISTEN_SECS: u64 = 5;
const TUYA_TCP_PORT: u16 = 6668;

/// `tuyactl` discovers devices or sends a single command.
///
/// Command mode: `tuyactl <host> <id> <key> [type] <on|off|get> [version]`
/// `type` is one of `bulb`, `light`, `switch` (defaults to a bulb/light
/// control point of 20 when absent; `switch` uses control point 1).
#[derive(Parser, Debug)]
#[command(name = "tuyactl")]
struct Args {
    /// Listen for discovery beacons instead of sending a command.
    #[arg(long)]
    discover: bool,

    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = if args.discover {
        run_discover().await
    } else {
        run_command(&args.rest).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tuyactl: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_discover() -> Result<(), String> {
    let plaintext = bind(6666).await?;
    let encrypted = bind(6667).await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(DISCOVERY_LISTEN_SECS);

    let mut plain_buf = vec![0u8; 2048];
    let mut enc_buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            result = plaintext.recv_from(&mut plain_buf) => {
                if let Ok((n, from)) = result {
                    print_beacon(&plain_buf[..n], None, from.ip().to_string());
                }
            }
            result = encrypted.recv_from(&mut enc_buf) => {
                if let Ok((n, from)) = result {
                    let secret = Secret {
                        id: String::new(),
                        local_key: tuya_lan::crypto::discovery_key_v33(),
                        version: Version::V3_3,
                    };
                    print_beacon(&enc_buf[..n], Some(&secret), from.ip().to_string());
                }
            }
        }
    }
    Ok(())
}

fn print_beacon(datagram: &[u8], secret: Option<&Secret>, source: String) {
    let (_code, _seq, body) = protocol::decode(datagram, secret);
    if body.is_empty() {
        return;
    }
    if let Some(beacon) = messages::parse_beacon(&body) {
        println!(
            "{source}\tgwId={}\tproductKey={}\tencrypt={}\tversion={}",
            beacon.gw_id,
            beacon.product_key,
            beacon.encrypt,
            beacon.version.as_deref().unwrap_or("?"),
        );
    }
}

async fn bind(port: u16) -> Result<UdpSocket, String> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("binding :{port}: {e}"))?;
    socket
        .set_broadcast(true)
        .map_err(|e| format!("enabling broadcast on :{port}: {e}"))?;
    Ok(socket)
}

fn control_point_for(type_name: &str) -> u32 {
    match type_name {
        "switch" => 1,
        _ => 20,
    }
}

async fn run_command(rest: &[String]) -> Result<(), String> {
    if rest.len() < 4 {
        return Err("usage: tuyactl <host> <id> <key> [type] <on|off|get> [version]".to_string());
    }
    let host = &rest[0];
    let id = &rest[1];
    let key = &rest[2];

    let (type_name, action, version_str) = match rest.len() {
        4 => (None, rest[3].as_str(), None),
        5 => {
            if matches!(rest[3].as_str(), "bulb" | "light" | "switch") {
                (Some(rest[3].as_str()), rest[4].as_str(), None)
            } else {
                (None, rest[3].as_str(), Some(rest[4].as_str()))
            }
        }
        6 => (Some(rest[3].as_str()), rest[4].as_str(), Some(rest[5].as_str())),
        _ => return Err("too many arguments".to_string()),
    };

    let control_point = control_point_for(type_name.unwrap_or("bulb"));
    let version = version_str
        .and_then(|s| Version::from_str(s).ok())
        .unwrap_or_default();

    let ip: IpAddr = host
        .parse()
        .map_err(|_| format!("invalid host address: {host}"))?;
    let secret = Secret::new(id.clone(), key, version);
    let addr = SocketAddr::new(ip, TUYA_TCP_PORT);
    let now = tuya_lan::eventloop::unix_now();

    match action {
        "get" => {
            let json = messages::query_payload(id, now);
            let (_, _, body) = exchange(addr, &secret, QUERY, &json).await?;
            let value = messages::extract_dp_bool(&body, control_point);
            println!("{}", value.map(|v| if v { "on" } else { "off" }).unwrap_or("unknown"));
        }
        "on" | "off" => {
            let target = action == "on";
            let json = messages::control_payload(id, control_point, target, now);
            exchange(addr, &secret, CONTROL, &json).await?;
            println!("ok");
        }
        other => return Err(format!("unknown action: {other}")),
    }
    Ok(())
}

async fn exchange(
    addr: SocketAddr,
    secret: &Secret,
    code: u32,
    json: &[u8],
) -> Result<(u32, u32, Vec<u8>), String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| format!("connecting to {addr}: {e}"))?;
    let frame = protocol::encode_to_vec(secret, code, 0, json);
    stream
        .write_all(&frame)
        .await
        .map_err(|e| format!("writing to {addr}: {e}"))?;
    let mut buf = vec![0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| format!("reading from {addr}: {e}"))?;
    buf.truncate(n);
    Ok(protocol::decode(&buf, Some(secret)))
}
