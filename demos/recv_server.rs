// In demos/recv_server.rs
use dmxp_transport::Transport::{RecvConfig, Transport};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MSG_TYPE: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let conf = match args.get(1) {
        Some(path) => RecvConfig::from_file(path)?,
        None => RecvConfig::default(),
    };

    let mut transport = Transport::init(conf)?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    transport.register(MSG_TYPE, move |_ty: u32, body: &[u8]| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        // Format: "message_number:hash"
        let text = String::from_utf8_lossy(body);
        if n % 100 == 0 {
            println!("{:<10} {}", n, text);
        }
    })?;

    transport.startup()?;
    println!("Server: listening on {:?}", transport.local_addr());

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        let recv = transport.recv_stats();
        let work = transport.work_stats();
        println!(
            "conns:{} recv:{} drop:{} err:{} proc:{} handled:{}",
            recv.connections,
            recv.recv_total,
            recv.drop_total,
            recv.err_total,
            work.proc_total,
            received.load(Ordering::Relaxed)
        );
    }

    println!("Server: shutting down");
    transport.destroy();
    Ok(())
}
