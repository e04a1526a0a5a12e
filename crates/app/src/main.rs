use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use skeleton_tracker_core::{
    AppConfig, MiddlewareRuntime, SimulatedBackend, SyntheticScene, TrackerError, UserEvent,
    UserTracker,
};
use tracing_subscriber::EnvFilter;

fn main() -> skeleton_tracker_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            users,
            frames,
            fps,
            track_out_of_frame,
            drop_every,
        } => {
            let mut config = load_config(config.as_deref())?;
            if track_out_of_frame {
                config.tracker.track_out_of_frame = true;
            }
            run_simulation(&config, users, frames, fps, drop_every)
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> skeleton_tracker_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_simulation(
    config: &AppConfig,
    users: u16,
    frames: Option<u32>,
    fps: u32,
    drop_every: u32,
) -> skeleton_tracker_core::Result<()> {
    let backend = SimulatedBackend::new(&config.sensor);
    let mut tracker = UserTracker::setup(backend, &config.tracker, MiddlewareRuntime::global())?;
    tracing::info!(
        version = %tracker.middleware_version(),
        track_out_of_frame = tracker.track_out_of_frame(),
        "starting simulation"
    );

    tracker.add_listener(|event: &UserEvent| match event {
        UserEvent::NewUser(user) => {
            tracing::info!(id = user.id(), status = %user.status(), "user entered")
        }
        UserEvent::LostUser(user) => {
            tracing::info!(id = user.id(), activity = user.activity(), "user left")
        }
    });

    let scene = SyntheticScene::new(users, &config.sensor).with_dropped_frames(drop_every);
    let frames = frames.unwrap_or_else(|| scene.total_frames());
    let interval = Duration::from_millis(1000 / u64::from(fps.max(1)));

    let producer = tracker.ingest().clone();
    let handle = thread::spawn(move || -> skeleton_tracker_core::Result<()> {
        for index in 0..frames {
            producer.on_frame_read(scene.read_frame(index))?;
            thread::sleep(interval);
        }
        Ok(())
    });

    let (mut entered, mut left) = (0usize, 0usize);
    loop {
        let finished = handle.is_finished();
        for event in tracker.update()? {
            match event {
                UserEvent::NewUser(_) => entered += 1,
                UserEvent::LostUser(_) => left += 1,
            }
        }

        for user in tracker.active_users() {
            tracing::trace!(id = user.id(), status = %user.status(), "active user");
        }

        if finished {
            break;
        }
        thread::sleep(interval / 2);
    }

    handle
        .join()
        .map_err(|_| TrackerError::msg("frame producer panicked"))??;

    let depth = &config.depth_range;
    let lit = tracker
        .depth_pixels(depth.near, depth.far, depth.invert)?
        .map(|pixels| pixels.iter().filter(|value| **value > 0).count())
        .unwrap_or(0);

    let labelled = tracker
        .ingest()
        .latest_user_map()?
        .iter()
        .filter(|id| **id != 0)
        .count();

    tracing::info!(
        entered,
        left,
        remaining = tracker.num_users(),
        frames_received = tracker.ingest().frames_received()?,
        fps = tracker.fps()?,
        lit_depth_pixels = lit,
        user_pixels = labelled,
        "simulation finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Depth-sensor skeleton user tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the tracker with a scripted scene on a producer thread.
    Simulate {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of scripted users walking through the scene.
        #[arg(short, long, default_value_t = 3)]
        users: u16,
        /// Frames to deliver; defaults to the length of the script.
        #[arg(short, long)]
        frames: Option<u32>,
        /// Simulated sensor frame rate.
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Keep users that step out of view instead of dropping them.
        #[arg(long)]
        track_out_of_frame: bool,
        /// Fail every Nth frame read to exercise dropped frames; 0 disables.
        #[arg(long, default_value_t = 0)]
        drop_every: u32,
    },
    /// Print the effective configuration as JSON.
    Config {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
