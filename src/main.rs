#[cfg(not(feature = "streaming"))]
fn main() {
    eprintln!(
        "The opl-stream player requires the \"streaming\" feature. Rebuild with `--features streaming` to enable playback."
    );
}

#[cfg(feature = "streaming")]
mod cli {
    use anyhow::{bail, Context};
    use opl_stream::{EmulatorKind, Engine, EngineConfig, RodioDevice, SongId};
    use std::env;
    use std::io::{self, Write};
    use std::time::{Duration, Instant};
    use tracing_subscriber::EnvFilter;

    /// Host frame period (~60 Hz)
    const FRAME: Duration = Duration::from_micros(16_667);

    struct Options {
        emulator: EmulatorKind,
        loops: u32,
        file: String,
    }

    fn usage() {
        eprintln!(
            "Usage:\n  opl-stream [--emulator <name|tag>] [--loops <n>] <file>\n\nFlags:\n  --emulator <mode>    Select the FM emulator:\n                         - nuked (1, default)\n                         - dosbox (2)\n                         - silverman (3)\n                         - satoh (4)\n                         - dual (5)\n  --loops <n>          Passes to play, 0 loops forever (default 1)\n  -h, --help           Show this help\n\nExamples:\n  opl-stream music/intro.imf\n  opl-stream --emulator dual --loops 0 music/theme.dro\n"
        );
    }

    fn parse_args() -> anyhow::Result<Option<Options>> {
        let mut emulator = EmulatorKind::default();
        let mut loops = 1;
        let mut file = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => return Ok(None),
                "--emulator" => {
                    let value = args.next().context("--emulator requires an argument")?;
                    emulator = value.parse()?;
                }
                "--loops" => {
                    let value = args.next().context("--loops requires an argument")?;
                    loops = value
                        .parse()
                        .with_context(|| format!("Invalid loop count: {}", value))?;
                }
                _ if arg.starts_with("--emulator=") => {
                    emulator = arg["--emulator=".len()..].parse()?;
                }
                _ if arg.starts_with('-') => bail!("Unknown flag: {}", arg),
                _ => file = Some(arg),
            }
        }

        Ok(file.map(|file| Options {
            emulator,
            loops,
            file,
        }))
    }

    fn print_info(engine: &mut Engine<RodioDevice>, id: SongId) -> anyhow::Result<()> {
        println!("Format:      {}", engine.format_name(id)?);
        let title = engine.title(id)?;
        if !title.is_empty() {
            println!("Title:       {}", title);
        }
        let author = engine.author(id)?;
        if !author.is_empty() {
            println!("Author:      {}", author);
        }
        println!("Subsongs:    {}", engine.subsong_count(id)?);
        println!("Duration:    {:.1} s", engine.duration(id)?);
        println!("Emulator:    {}\n", engine.backend_name());
        Ok(())
    }

    pub fn run() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .init();

        println!("OPL2/OPL3 Streaming Player");
        println!("==========================\n");

        let options = match parse_args() {
            Ok(Some(options)) => options,
            Ok(None) => {
                usage();
                return Ok(());
            }
            Err(err) => {
                usage();
                return Err(err);
            }
        };

        let config = EngineConfig::with_emulator(options.emulator);
        let mut engine = Engine::new(config, RodioDevice::new()).context("Failed to initialize audio")?;
        let id = engine
            .load_song_from_file(&options.file)
            .with_context(|| format!("Failed to load '{}'", options.file))?;

        print_info(&mut engine, id)?;
        engine.play(id, options.loops)?;

        let started = Instant::now();
        while engine.is_playing() {
            let frame_start = Instant::now();
            engine.tick();

            print!("\rPosition: {:7.2} s", engine.position(id)?);
            io::stdout().flush()?;

            if let Some(rest) = FRAME.checked_sub(frame_start.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        println!("\n\nPlayback complete after {:.1} s", started.elapsed().as_secs_f32());
        engine.shutdown();
        Ok(())
    }
}

#[cfg(feature = "streaming")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
