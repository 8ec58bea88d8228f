//! Lumen - audio-reactive DMX lighting
//!
//! Listens to an audio input (or plays a file), renders the selected scene
//! onto a DMX universe and keeps the engine alive until told to quit.

mod commands;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing_subscriber::EnvFilter;

use commands::{parse_command, Command, HELP};
use lumen_dmx::{Connector, DmxConfig, PortOpener, SerialOpener};
use lumen_engine::{
    list_input_devices, probe_device, Controller, DmxLink, EngineConfig, EngineEvent, FileAudio, FilePlayback,
    InputSource, LoudnessPredictor, PlaybackFollower, ScenePredictor, SongLibrary,
};
use lumen_library::{load_profile, AudioLoader, Config, FallbackTable, SceneStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive DMX lighting engine", long_about = None)]
struct Cli {
    /// Fixture profile (JSON). Defaults to the configured profile.
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Directory of scene files
    #[arg(short, long)]
    scenes: Option<PathBuf>,

    /// Fallback table (JSON)
    #[arg(short, long)]
    fallbacks: Option<PathBuf>,

    /// Write generated fallbacks back to the fallback table
    #[arg(long)]
    save_fallbacks: bool,

    /// Scene to start with
    #[arg(long)]
    scene: Option<String>,

    /// DMX serial port; scans when omitted
    #[arg(long)]
    port: Option<String>,

    #[arg(long, default_value_t = 57_600)]
    baud: u32,

    /// Send frames to memory instead of hardware
    #[arg(long)]
    dry_run: bool,

    /// Audio input device name
    #[arg(short, long)]
    device: Option<String>,

    /// Play an audio file instead of capturing
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Loop the input file
    #[arg(long = "loop", requires = "input")]
    looped: bool,

    /// Follow predicted scenes, e.g. "0:chill,0.05:party,0.2:rave"
    #[arg(long, value_name = "LEVELS")]
    auto_scene: Option<String>,

    /// Directory of per-song section files, named by track
    #[arg(long, requires = "input")]
    songs: Option<PathBuf>,

    /// List audio input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices() {
            println!("{}", name);
        }
        return Ok(());
    }
    if cli.list_ports {
        for name in SerialOpener.list()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = Config::load();
    let mut controller = build_controller(&cli, &config)?;
    controller.start().context("Failed to start engine")?;

    // Remember the port that worked for next time
    if !cli.dry_run {
        if let Some(port) = controller.port() {
            if config.last_dmx_port.as_deref() != Some(port.as_str()) {
                config.last_dmx_port = Some(port);
                if let Err(e) = config.save() {
                    tracing::warn!("could not save config: {}", e);
                }
            }
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let (cmd_tx, cmd_rx) = bounded(64);
    spawn_stdin_reader(cmd_tx);

    let result = run(&mut controller, &cmd_rx, &shutdown);
    shutdown.store(true, Ordering::SeqCst);
    controller.stop();
    result
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

fn build_controller(cli: &Cli, config: &Config) -> anyhow::Result<Controller> {
    let Some(profile_path) = cli.profile.clone().or_else(|| config.profile.clone()) else {
        bail!("No fixture profile given (use --profile or set profile= in {})", Config::config_path().display());
    };
    let profile = Arc::new(load_profile(&profile_path).context("Failed to load profile")?);

    let scenes_dir = cli
        .scenes
        .clone()
        .or_else(|| config.scenes_dir.clone())
        .unwrap_or_else(|| PathBuf::from("scenes"));
    let fallback_path = cli.fallbacks.clone().or_else(|| config.fallback_file.clone());
    let fallbacks = match &fallback_path {
        Some(path) if path.exists() => FallbackTable::load(path).context("Failed to load fallback table")?,
        _ => FallbackTable::new(),
    };

    let mut store = SceneStore::load_dir(&scenes_dir, profile, fallbacks)
        .with_context(|| format!("Failed to load scenes from {}", scenes_dir.display()))?;
    if store.ensure_fallbacks() > 0 && cli.save_fallbacks {
        save_fallbacks(&store, fallback_path.as_deref())?;
    }
    let initial = cli.scene.clone().unwrap_or_else(|| store.requested_name().to_string());
    store.set_scene(&initial).with_context(|| format!("Unknown scene '{}'", initial))?;

    let engine_config = EngineConfig {
        auto_scene: cli.auto_scene.is_some(),
        ..EngineConfig::default()
    };

    let (input, file) = match &cli.input {
        Some(path) => {
            let audio = load_file(path, cli.looped)?;
            (InputSource::File(audio.clone()), Some(audio))
        }
        None => {
            let device = cli.device.clone().or_else(|| config.audio_device.clone());
            let name = probe_device(device.as_deref())?;
            tracing::info!(device = %name, "using audio input");
            (InputSource::Device(device), None)
        }
    };

    let link = if cli.dry_run {
        tracing::info!("dry run, DMX frames stay in memory");
        DmxLink::memory("dry-run").0
    } else {
        let dmx = DmxConfig {
            port: cli.port.clone(),
            baud_rate: cli.baud,
            ..DmxConfig::default()
        };
        DmxLink::hardware(Connector::new(dmx), config.last_dmx_port.clone())
    };

    let predictor: Option<Box<dyn ScenePredictor>> = match &cli.auto_scene {
        Some(levels) => Some(Box::new(
            LoudnessPredictor::parse(levels).map_err(|e| anyhow::anyhow!("Invalid --auto-scene levels: {}", e))?,
        )),
        None => None,
    };

    let mut controller = Controller::new(engine_config, store, input, link, predictor)?;

    if let (Some(dir), Some(audio)) = (&cli.songs, file) {
        let songs = SongLibrary::load_dir(dir).with_context(|| format!("Failed to load songs from {}", dir.display()))?;
        controller = controller.with_follower(PlaybackFollower::new(Box::new(FilePlayback::new(audio)), songs));
    }
    Ok(controller)
}

fn load_file(path: &Path, looped: bool) -> anyhow::Result<Arc<FileAudio>> {
    let loaded = AudioLoader::default()
        .load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string();
    tracing::info!(
        title = %title,
        artist = %loaded.info.artist,
        seconds = loaded.info.duration_secs,
        "audio file loaded"
    );
    Ok(Arc::new(FileAudio::new(title, loaded.samples, loaded.sample_rate, looped)))
}

fn save_fallbacks(store: &SceneStore, path: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = path else {
        tracing::warn!("no fallback file configured, generated fallbacks not saved");
        return Ok(());
    };
    store.fallbacks().save(path).context("Failed to save fallback table")?;
    tracing::info!(path = %path.display(), "fallback table saved");
    Ok(())
}

/// Read operator commands on a detached thread
fn spawn_stdin_reader(tx: Sender<Command>) {
    let spawned = thread::Builder::new().name("lumen-stdin".into()).spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("unknown command, type 'help'"),
            }
        }
        // EOF behaves like quit
        let _ = tx.send(Command::Quit);
    });
    if let Err(e) = spawned {
        tracing::warn!("stdin commands unavailable: {}", e);
    }
}

fn run(controller: &mut Controller, commands: &Receiver<Command>, shutdown: &AtomicBool) -> anyhow::Result<()> {
    let interval = controller.config().supervision_interval;
    let mut last_supervise = Instant::now();
    println!("{}", HELP);

    while !shutdown.load(Ordering::SeqCst) {
        match commands.recv_timeout(Duration::from_millis(50)) {
            Ok(Command::Quit) => break,
            Ok(cmd) => handle_command(controller, cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(event) = controller.events().try_recv() {
            log_event(&event);
        }

        if last_supervise.elapsed() >= interval {
            last_supervise = Instant::now();
            controller.supervise().context("Engine failed")?;
        }
    }
    Ok(())
}

fn handle_command(controller: &mut Controller, cmd: Command) {
    match cmd {
        Command::Scene(name) => match controller.change_scene(&name) {
            Ok(sel) if sel.requested != sel.effective => {
                println!("scene {} (fallback for {})", sel.effective, sel.requested)
            }
            Ok(sel) => println!("scene {}", sel.effective),
            Err(e) => println!("{}", e),
        },
        Command::Reload => match controller.reload_scenes() {
            Ok(sel) => println!("{} scenes, playing {}", controller.scene_names().len(), sel.effective),
            Err(e) => println!("reload failed: {}", e),
        },
        Command::ListScenes => {
            let current = controller.selection().effective;
            for name in controller.scene_names() {
                let marker = if name == current { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
        Command::Status => {
            let sel = controller.selection();
            println!("scene: {} (requested {})", sel.effective, sel.requested);
            if let Some(p) = controller.predicted_scene() {
                println!("predicted: {}", p.scene);
            }
            println!("port: {}", controller.port().unwrap_or_else(|| "none".to_string()));
        }
        Command::Health => match serde_json::to_string_pretty(&controller.health()) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("{}", e),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::SceneChanged { requested, effective } if requested != effective => {
            tracing::info!(requested = %requested, effective = %effective, "scene changed (fallback)")
        }
        EngineEvent::SceneChanged { effective, .. } => tracing::info!(scene = %effective, "scene changed"),
        EngineEvent::Predicted { scene, cluster } => tracing::debug!(scene = %scene, cluster = ?cluster, "predicted"),
        EngineEvent::WorkerRestarted { name, reason } => {
            tracing::warn!(worker = %name, reason = %reason, "worker restarted")
        }
        EngineEvent::Reinitialized => tracing::warn!("engine reinitialized"),
        EngineEvent::Error(message) => tracing::error!("{}", message),
    }
}
