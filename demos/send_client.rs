// In demos/send_client.rs
use dmxp_transport::Transport::{Client, SendConfig, SendError, SendService};
use sha2::{Digest, Sha256};
use std::env;
use std::time::{Duration, Instant};

const MSG_TYPE: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <num_messages> [config.toml]", args[0]);
        std::process::exit(1);
    }
    let num_messages: usize = args[1].parse().expect("Invalid number of messages");
    let conf = match args.get(2) {
        Some(path) => SendConfig::from_file(path)?,
        None => SendConfig::default(),
    };

    let mut service = SendService::init(conf.clone())?;
    service.startup()?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while !service.is_connected() {
        if Instant::now() > deadline {
            eprintln!("Client: no connection to {}:{}", conf.server_addr, conf.port);
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let mut client = Client::init(&conf, 0)?;
    println!("Client: sending {} messages", num_messages);

    let start = Instant::now();
    let mut sent = 0;
    for i in 0..num_messages {
        let mut hasher = Sha256::new();
        hasher.update(format!("message_{}", i).as_bytes());
        let message = format!("{}:{:x}", i, hasher.finalize());

        loop {
            match client.send(MSG_TYPE, message.as_bytes()) {
                Ok(()) => {
                    sent += 1;
                    break;
                }
                Err(SendError::QueueAllocFailed) | Err(SendError::QueueFull) => {
                    // Sender is behind, retry
                    std::thread::sleep(Duration::from_micros(50));
                }
                Err(e) => {
                    eprintln!("Failed to send message {}: {}", i, e);
                    break;
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!("Client: queued {} messages in {:.2?}", sent, elapsed);

    // Give the sender a moment to flush before tearing down the link
    std::thread::sleep(Duration::from_secs(1));
    if let Some(stat) = service.send_stat(0) {
        println!(
            "Client: sent {} errors {} keepalives {}",
            stat.send_total, stat.err_total, stat.kpalive_total
        );
    }
    service.destroy();
    Ok(())
}
