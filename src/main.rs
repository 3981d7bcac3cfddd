use std::{
    fmt::Write as _,
    path::PathBuf,
    thread,
    time::Duration,
};

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::Error;
use rocket_telemetry::{
    BackupOptions,
    Message,
    MessageReceiver,
    Modifiers,
    Pacing,
    Reader,
    ReaderOptions,
    SerialOptions,
    Source,
    available_ports,
    modifier::DEFAULT_ACCEL_RESOLUTION,
    reader::{
        DEFAULT_BAUD_RATE,
        TLM_INTERVAL,
    },
};

fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Ports => {
            for port in available_ports()? {
                println!("{port}");
            }
        }
        Command::Listen {
            port,
            baud_rate,
            timeout,
            backup,
            diagnostic_log,
            output,
        } => {
            let backup = backup.map(|path| {
                BackupOptions {
                    path,
                    diagnostic_log,
                }
            });
            let source = Source::Serial(SerialOptions {
                port,
                baud_rate,
                timeout,
            });
            output.run(backup, source)?;
        }
        Command::Replay {
            file,
            interval,
            timestamps,
            backup,
            diagnostic_log,
            output,
        } => {
            let backup = backup.map(|path| {
                BackupOptions {
                    path,
                    diagnostic_log,
                }
            });
            let source = Source::RadioFile {
                path: file,
                pacing: pacing(interval, timestamps),
            };
            output.run(backup, source)?;
        }
        Command::Card {
            file,
            interval,
            timestamps,
            output,
        } => {
            let source = Source::CardFile {
                path: file,
                pacing: pacing(interval, timestamps),
            };
            output.run(None, source)?;
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports.
    Ports,
    /// Receive telemetry from a serial port.
    Listen {
        #[clap(short, long, env = "TELEMETRY_PORT")]
        port: String,

        #[clap(short, long, env = "TELEMETRY_BAUD_RATE", default_value_t = DEFAULT_BAUD_RATE)]
        baud_rate: u32,

        /// Read timeout of the serial port
        #[clap(long, default_value = "1s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Back up telemetry to this path. Extensions are added for each file.
        #[clap(long, env = "TELEMETRY_BACKUP")]
        backup: Option<PathBuf>,

        /// Also write a hex dump of every frame.
        #[clap(long)]
        diagnostic_log: bool,

        #[clap(flatten)]
        output: OutputArgs,
    },
    /// Replay a binary backup.
    Replay {
        file: PathBuf,

        /// Time between frames. 0s replays as fast as possible.
        #[clap(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Replay in real time, using the flight time.
        #[clap(long, conflicts_with = "interval")]
        timestamps: bool,

        /// Back up the replayed telemetry, e.g. to write the transcript again.
        #[clap(long)]
        backup: Option<PathBuf>,

        #[clap(long)]
        diagnostic_log: bool,

        #[clap(flatten)]
        output: OutputArgs,
    },
    /// Replay a transcript from the flight computer's SD card.
    Card {
        file: PathBuf,

        #[clap(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        #[clap(long, conflicts_with = "interval")]
        timestamps: bool,

        #[clap(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, clap::Args)]
struct OutputArgs {
    /// Print messages as JSON.
    #[clap(long)]
    json: bool,

    /// Accelerometer counts per g
    #[clap(long, env = "TELEMETRY_ACCEL_RESOLUTION", default_value_t = DEFAULT_ACCEL_RESOLUTION)]
    accel_resolution: f64,
}

impl OutputArgs {
    fn run(&self, backup: Option<BackupOptions>, source: Source) -> Result<(), Error> {
        let (mut reader, mut messages) = Reader::new(ReaderOptions {
            backup,
            modifiers: Modifiers::new(self.accel_resolution),
        });
        reader.start(source)?;

        loop {
            let running = reader.is_running();
            self.print_messages(&mut messages)?;
            if !running {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let statistics = reader.statistics();
        tracing::info!(?statistics, "reader finished");
        Ok(())
    }

    fn print_messages(&self, messages: &mut MessageReceiver) -> Result<(), Error> {
        for message in messages.drain() {
            if self.json {
                println!("{}", serde_json::to_string(&message)?);
            }
            else {
                println!("{}", format_message(&message)?);
            }
        }
        Ok(())
    }
}

fn format_message(message: &Message) -> Result<String, Error> {
    let mut line = format!(
        "{} {:>4} {:<10}",
        message.local_time.format("%H:%M:%S%.3f"),
        message.frame_size,
        message.decoder_state.to_string(),
    );
    for (key, value) in message.telemetry.iter() {
        write!(&mut line, " {key}={value}")?;
    }
    Ok(line)
}

fn pacing(interval: Option<Duration>, timestamps: bool) -> Pacing {
    if timestamps {
        Pacing::Timestamps
    }
    else {
        match interval.unwrap_or(TLM_INTERVAL) {
            Duration::ZERO => Pacing::Off,
            interval => Pacing::Interval(interval),
        }
    }
}
