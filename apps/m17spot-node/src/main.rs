use std::net::UdpSocket;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use m17spot_core::{Crc16, Packet};

mod cli;
mod config;
mod gate_state;
mod gateway;
mod hostmap;
mod modem;
mod stream;
mod voice;

use cli::{Cli, Commands};
use config::Config;
use gate_state::GateState;
use gateway::{GateOut, Gateway, VoiceQueue};
use hostmap::HostMap;
use voice::WordBank;

const SOCKET_POLL: Duration = Duration::from_millis(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let cfg = Config::load(&args.config)?;
            init_logging(&cfg);
            run(cfg)?;
        }
        Commands::CheckConfig(args) => {
            let cfg = Config::load(&args.config)?;
            init_logging(&cfg);
            let hosts = host_map(&cfg);
            let count = hosts.read_all()?;
            println!(
                "configuration OK: node {}, {count} reflectors",
                cfg.node_callsign().text()
            );
        }
    }

    Ok(())
}

fn init_logging(cfg: &Config) {
    let level = if cfg.repeater.debug || cfg.modem.debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn host_map(cfg: &Config) -> Arc<HostMap> {
    let my = cfg.gateway.my_host_path.trim();
    let my = (!my.is_empty()).then(|| Path::new(my).to_path_buf());
    Arc::new(HostMap::new(
        Path::new(&cfg.gateway.host_path),
        my.as_deref(),
        cfg.gateway.enable_ipv4,
        cfg.gateway.enable_ipv6,
    ))
}

fn run(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let my_cs = cfg.node_callsign();
    let version = cfg.type_version();
    let folder = Path::new(&cfg.gateway.audio_folder_path).to_path_buf();
    let state = GateState::new();

    let hosts = host_map(&cfg);
    hosts.read_all()?;
    let bank = WordBank::load(&folder)?;

    // ephemeral source ports; the reflector answers whichever we dialed from
    let sock4 = bind_socket(cfg.gateway.enable_ipv4, "0.0.0.0:0")?;
    let sock6 = bind_socket(cfg.gateway.enable_ipv6, "[::]:0")?;

    let keep_running = Arc::new(AtomicBool::new(true));
    {
        let flag = Arc::clone(&keep_running);
        ctrlc::set_handler(move || {
            flag.store(false, Ordering::SeqCst);
        })?;
    }

    let (to_gate, from_modem) = mpsc::channel::<Packet>();
    let (to_modem, from_gate) = mpsc::channel::<Packet>();
    let modem_thread = {
        let cfg = cfg.modem.clone();
        let state = state.clone();
        let flag = Arc::clone(&keep_running);
        thread::spawn(move || {
            modem::run_modem(&cfg, version, state, &to_gate, &from_gate, &flag)
        })
    };

    let mut gw = Gateway::new(
        my_cs,
        version,
        cfg.gateway.maintain_link,
        Arc::clone(&hosts),
        state.clone(),
        folder.clone(),
        Instant::now(),
    );
    let mut voice_queue = VoiceQueue::new();
    let mut player: Option<JoinHandle<()>> = None;
    let mut rng = StdRng::from_entropy();
    let crc = Crc16::new();
    let can = cfg.repeater.can;

    info!("m17spot node {} up", my_cs.text());
    let outs = gw.startup(cfg.gateway.startup_link.trim(), Instant::now());
    dispatch(
        outs,
        &sock4,
        &sock6,
        &to_modem,
        &mut voice_queue,
        &bank,
        &folder,
    );

    let mut buf = [0u8; 1024];
    while keep_running.load(Ordering::SeqCst) {
        if player.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(h) = player.take() {
                let _ = h.join();
                voice_queue.done(&state);
            }
        }
        if player.is_none() {
            if let Some(msg) = voice_queue.next(&state) {
                let halves = voice::message_halves(&folder, &msg);
                let master = voice::master_frame(&my_cs, can, version, rng.gen_range(1..=u16::MAX));
                let frames = voice::build_stream(&master, &halves, &crc);
                let tx = to_modem.clone();
                player = Some(thread::spawn(move || voice::play(frames, &tx)));
            }
        }

        for sock in [&sock4, &sock6].into_iter().flatten() {
            while let Ok((n, from)) = sock.recv_from(&mut buf) {
                let outs = gw.on_datagram(&buf[..n], from, Instant::now());
                dispatch(
                    outs,
                    &sock4,
                    &sock6,
                    &to_modem,
                    &mut voice_queue,
                    &bank,
                    &folder,
                );
            }
        }

        loop {
            match from_modem.try_recv() {
                Ok(pkt) => {
                    let outs = gw.on_modem_packet(pkt, Instant::now());
                    dispatch(
                        outs,
                        &sock4,
                        &sock6,
                        &to_modem,
                        &mut voice_queue,
                        &bank,
                        &folder,
                    );
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    error!("modem channel closed");
                    keep_running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }

        let outs = gw.tick(Instant::now());
        dispatch(
            outs,
            &sock4,
            &sock6,
            &to_modem,
            &mut voice_queue,
            &bank,
            &folder,
        );
    }

    info!("shutting down");
    drop(to_modem);
    let _ = modem_thread.join();
    if let Some(h) = player.take() {
        let _ = h.join();
    }
    info!("m17spot node {} stopped", my_cs.text());
    Ok(())
}

fn bind_socket(enabled: bool, addr: &str) -> std::io::Result<Option<UdpSocket>> {
    if !enabled {
        return Ok(None);
    }
    let sock = UdpSocket::bind(addr)?;
    sock.set_read_timeout(Some(SOCKET_POLL))?;
    Ok(Some(sock))
}

fn dispatch(
    outs: Vec<GateOut>,
    sock4: &Option<UdpSocket>,
    sock6: &Option<UdpSocket>,
    to_modem: &mpsc::Sender<Packet>,
    voice_queue: &mut VoiceQueue,
    bank: &WordBank,
    folder: &Path,
) {
    for out in outs {
        match out {
            GateOut::Udp { data, to } => {
                let sock = if to.is_ipv4() { sock4 } else { sock6 };
                match sock {
                    Some(s) => {
                        if let Err(e) = s.send_to(&data, to) {
                            warn!("UDP send to {to} failed: {e}");
                        }
                    }
                    None => warn!("no socket for {to}"),
                }
            }
            GateOut::ToModem(pkt) => {
                if to_modem.send(pkt).is_err() {
                    warn!("modem channel closed, frame dropped");
                }
            }
            GateOut::Speak(message) => voice_queue.push(message),
            GateOut::BuildCsFile { cs, stem } => {
                let out = folder.join(format!("{stem}.dat"));
                if let Err(e) = bank.make_callsign_file(&cs, &out) {
                    warn!("could not render {}: {e}", out.display());
                }
            }
        }
    }
}
