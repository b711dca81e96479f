use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use parley::config::CaptureConfig;
use parley::voice::wav::samples_to_wav;
use parley::voice::{AudioOutput, CaptureStream, CpalCaptureStream, CpalOutput, GaplessEngine};
use parley::{Backends, Config, Role, Session, SessionState};

/// Parley - talk to a voice agent from the terminal
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Agent configuration to use
    #[arg(long, env = "PARLEY_CONFIG_ID")]
    config_id: Option<String>,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Hold a voice conversation (default)
    Chat,
    /// Record from the microphone and save a WAV file
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Where to write the recording
        #[arg(short, long, default_value = "parley-mic-test.wav")]
        output: PathBuf,
    },
    /// Play a test tone through the gapless compositor
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let mut config = Config::load()?;
            if cli.config_id.is_some() {
                config.connection.config_id = cli.config_id;
            }
            config.capture.start_muted |= cli.muted;
            chat(config).await
        }
        Command::TestMic { duration, output } => test_mic(duration, &output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Terminal conversation loop
async fn chat(config: Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "loaded configuration");

    let session = Session::new(config, Backends::native()?);

    let _status = session.on_status_change(|status| {
        println!("[{status}]");
    });
    let _transcript = session.on_transcript(|entry| {
        if entry.interim {
            return;
        }
        let who = match entry.role {
            Role::User => "you",
            Role::Assistant => "agent",
        };
        println!("{who}: {}", entry.content);
    });

    if !session.start_session().await {
        let status = session.status();
        anyhow::bail!(
            "could not start session: {}",
            status.error.unwrap_or_else(|| status.state.to_string())
        );
    }

    println!("Connected. Speak, or type a message. /mute toggles the microphone, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/mute" => {
                        let muted = session.toggle_mute().await;
                        println!("{}", if muted { "microphone muted" } else { "microphone live" });
                    }
                    text => {
                        if !session.send_message(text).await {
                            println!("(not connected)");
                        }
                    }
                }
            }
        }

        if session.status().state != SessionState::Active {
            break;
        }
    }

    session.end_session().await;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64, output: &std::path::Path) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = CaptureConfig::default();
    let mut stream = CpalCaptureStream::open(&config)?;
    println!("Capturing at {} Hz", config.sample_rate);
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = stream.take_samples();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
        recording.extend(samples);
    }
    drop(stream);

    let wav = samples_to_wav(&recording, config.sample_rate)?;
    std::fs::write(output, &wav)?;

    println!("\n---");
    println!("Wrote {} bytes to {}", wav.len(), output.display());
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Play a tone split into segments, the way the agent streams speech
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds, with no clicks between segments\n");

    let mut output = CpalOutput::new()?;
    let playback = Config::default().playback;
    let mut engine = GaplessEngine::new(&playback, output.sample_rate());

    let sample_rate = playback.source_sample_rate;
    let frequency = 440.0_f32;
    let segment_len = sample_rate as usize / 4;

    // Eight quarter-second segments of one continuous sine
    for segment in 0..8 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..segment_len)
            .map(|i| {
                let t = (segment * segment_len + i) as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
            })
            .collect();
        engine.enqueue_wav(&samples_to_wav(&samples, sample_rate)?)?;
    }

    let Some(buffer) = engine.drain() else {
        anyhow::bail!("compositor produced no audio");
    };
    println!(
        "Playing {} segments as {} samples at {} Hz...",
        buffer.segments,
        buffer.samples.len(),
        buffer.sample_rate
    );

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let expected = buffer.duration();
    output.play(
        buffer,
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    )?;

    if tokio::time::timeout(expected + Duration::from_secs(2), done_rx)
        .await
        .is_err()
    {
        output.stop();
        anyhow::bail!("playback did not complete");
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
