//! Minimal line-oriented chat client
//!
//! Connects to a lanchat server, claims a username, forwards stdin
//! lines as chat messages and prints whatever the server sends. Local
//! commands: /nick <name>, /help, /quit.

use clap::Parser;
use lanchat::net::codec::{LineCodec, encode};
use lanchat::net::validate::{Command, InputValidator};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "lanchat-client", version, about = "lanchat line client")]
struct Args {
    /// Server host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(default_value_t = 8080)]
    port: u16,

    /// Username to claim on connect
    #[arg(short, long, default_value = "guest")]
    username: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let stream = match TcpStream::connect((args.host.as_str(), args.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("could not connect to {}:{}: {}", args.host, args.port, e);
            return ExitCode::FAILURE;
        }
    };
    let (read_half, mut write_half) = stream.into_split();
    println!("connected to {}:{}", args.host, args.port);

    let mut username = args.username.clone();
    if write_half
        .write_all(encode("CMD_USER", &username).as_bytes())
        .await
        .is_err()
    {
        eprintln!("connection lost during setup");
        return ExitCode::FAILURE;
    }

    // Printer task: decode server records as they arrive
    let printer = tokio::spawn(async move {
        let mut codec = LineCodec::new();
        let mut read_half = read_half;
        let mut buf = [0u8; 4096];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let Ok(frames) = codec.push(&buf[..n]) else {
                        break;
                    };
                    for frame in frames {
                        match frame.tag.as_deref() {
                            Some("MSG") => println!("{}", frame.payload),
                            Some("SRV") => println!("* {}", frame.payload),
                            Some("ULIST") => println!("* online: {}", frame.payload),
                            _ => {}
                        }
                    }
                }
            }
        }
        println!("disconnected from server");
    });

    let validator = InputValidator::new(50, 1000, false);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            match validator.parse_command(&line) {
                Some(Command::Quit) => break,
                Some(Command::Help) => {
                    println!("commands: /nick <name>, /help, /quit");
                }
                Some(Command::Nick(name)) => {
                    if write_half
                        .write_all(encode("CMD_USER", &name).as_bytes())
                        .await
                        .is_err()
                    {
                        break;
                    }
                    username = name;
                }
                None => println!("unrecognized command; try /help"),
            }
            continue;
        }

        let record = encode("MSG", &format!("{username}: {line}"));
        if write_half.write_all(record.as_bytes()).await.is_err() {
            break;
        }
    }

    drop(write_half);
    printer.abort();
    ExitCode::SUCCESS
}
