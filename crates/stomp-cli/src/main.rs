mod console;
mod render;

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use stomp_engine::dsp::waveshaper::Oversample;
use stomp_engine::{ChainSettings, Engine, EngineConfig, StageKind, DEFAULT_BLOCK_FRAMES};
use tracing_subscriber::EnvFilter;

use console::ConsoleCommand;
use render::RenderJob;

#[derive(Parser)]
#[command(name = "stomp", version, about = "Guitar pedal chain: boost, distortion, delay, reverb")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// Run the chain live from an input device to an output device
    Run(RunArgs),
    /// Render a WAV file through the chain
    Process(ProcessArgs),
}

#[derive(Args)]
struct ChainArgs {
    #[arg(long, default_value_t = 1.5)]
    boost: f32,
    #[arg(long, default_value_t = 300.0)]
    distortion: f32,
    /// Delay time in seconds
    #[arg(long, default_value_t = 0.4)]
    delay_time: f32,
    #[arg(long, default_value_t = 0.5)]
    feedback: f32,
    /// Wet share of the delay, 0..1
    #[arg(long, default_value_t = 0.5)]
    mix: f32,
    /// Start with these stages bypassed (repeatable)
    #[arg(long = "off", value_name = "STAGE")]
    off: Vec<StageKind>,
    /// Impulse response name, looked up as <ir-dir>/<name>.wav
    #[arg(long, default_value = "hall")]
    impulse: String,
    #[arg(long, default_value = "sound")]
    ir_dir: PathBuf,
    /// Convolution partition size in frames
    #[arg(long, default_value_t = 512)]
    partition: usize,
    /// Use the impulse response as recorded
    #[arg(long)]
    no_normalize: bool,
    /// Run the waveshaper at the stream rate
    #[arg(long)]
    no_oversample: bool,
}

impl ChainArgs {
    fn settings(&self) -> ChainSettings {
        let mut enabled = [true; 4];
        for kind in &self.off {
            enabled[kind.index()] = false;
        }
        ChainSettings {
            boost_gain: self.boost,
            distortion_amount: self.distortion,
            delay_time: self.delay_time,
            delay_feedback: self.feedback,
            delay_mix: self.mix,
            enabled,
            oversample: if self.no_oversample { Oversample::None } else { Oversample::X4 },
            impulse: self.impulse.clone(),
            partition: self.partition,
            normalize_impulse: !self.no_normalize,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Input device, by case-insensitive substring
    #[arg(long)]
    input: Option<String>,
    #[arg(long)]
    output: Option<String>,
    /// Input device, by index from `stomp devices`
    #[arg(long)]
    input_index: Option<usize>,
    #[arg(long)]
    output_index: Option<usize>,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Frames per buffer, if the backend allows it
    #[arg(long)]
    block_size: Option<u32>,
    #[command(flatten)]
    chain: ChainArgs,
}

#[derive(Args)]
struct ProcessArgs {
    input: PathBuf,
    output: PathBuf,
    /// Seconds of silence rendered after the input, for delay and reverb tails
    #[arg(long, default_value_t = 2.0)]
    tail: f32,
    #[arg(long, default_value_t = DEFAULT_BLOCK_FRAMES)]
    block_size: usize,
    #[command(flatten)]
    chain: ChainArgs,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Devices => stomp_engine::devices::print_devices(),
        Command::Run(args) => run_live(args),
        Command::Process(args) => {
            let job = RenderJob {
                input: args.input,
                output: args.output,
                impulse_dir: args.chain.ir_dir.clone(),
                settings: args.chain.settings(),
                tail_secs: args.tail,
                block_frames: args.block_size,
            };
            render::render_file(&job)?;
            Ok(())
        }
    }
}

fn run_live(args: RunArgs) -> Result<()> {
    let cfg = EngineConfig {
        input_name: args.input,
        output_name: args.output,
        input_index: args.input_index,
        output_index: args.output_index,
        sample_rate: args.sample_rate,
        block_size: args.block_size,
        impulse_dir: args.chain.ir_dir.clone(),
        settings: args.chain.settings(),
    };
    let mut engine = Engine::new(cfg);
    let controller = engine.start()?;
    println!("{}", console::HELP);

    let (tx, rx) = unbounded::<String>();
    thread::Builder::new().name("console".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;

    loop {
        if let Some(status) = controller.lock().poll() {
            tracing::info!(?status, "reverb load resolved");
        }
        let line = match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match console::parse(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if cmd == ConsoleCommand::Quit {
            break;
        }
        match console::apply(&mut controller.lock(), &cmd) {
            Ok(Some(reply)) => println!("{reply}"),
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    engine.stop();
    Ok(())
}
