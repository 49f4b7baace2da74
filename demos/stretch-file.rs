use std::error::Error;
use wavers::{write, Wav};

use arg::{parse_args, Args};

use elastic_rs::{
    AudioBuffer, Formant, LogLevel, PitchMode, Preset, SessionConfig, StretchOptions,
    StretchSession,
};

// -------------------------------------------------------------------------------------------------

#[derive(Args, Debug)]
struct Arguments {
    #[arg(short = "r", long = "ratio", default_value = "1.0")]
    /// The time ratio: 2.0 doubles the duration
    ratio: f64,
    #[arg(short = "p", long = "pitch", default_value = "1.0")]
    /// The pitch scale: 2.0 shifts one octave up
    pitch: f64,
    #[arg(short = "f", long = "formants")]
    /// Preserve formants when shifting the pitch
    formants: bool,
    #[arg(short = "c", long = "percussive")]
    /// Use the percussive preset
    percussive: bool,
    #[arg(short = "v", long = "verbose")]
    /// Log engine setup and processing
    verbose: bool,
    /// Input and output file paths
    paths: Vec<String>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Parse cmd arguments
    let args = parse_args::<Arguments>();
    let (Some(input_path), Some(output_path)) = (args.paths.first(), args.paths.get(1)) else {
        return Err("Please specify an input and output path as argument".into());
    };

    println!("Converting `{input_path}` -> `{output_path}`");
    println!("Ratio: {:.2}x, Pitch: {:.2}x", args.ratio, args.pitch);

    // Open Wav input file
    let mut reader = Wav::<f32>::from_path(input_path)?;
    let channels = reader.n_channels() as usize;
    let sample_rate = reader.sample_rate() as u32;
    let mut interleaved = Vec::new();
    for frame in reader.frames() {
        interleaved.extend((0..channels).map(|channel| frame[channel]));
    }
    let input = AudioBuffer::from_interleaved(&interleaved, channels)?;

    // Prepare the session
    let preset = if args.percussive {
        Preset::Percussive
    } else {
        Preset::Default
    };
    let mut options = StretchOptions::preset(preset).pitch_mode(PitchMode::HighQuality);
    if args.formants {
        options = options.formant(Formant::Preserved);
    }
    let mut config = SessionConfig::new(sample_rate, channels)
        .with_options(options)
        .with_time_ratio(args.ratio)
        .with_pitch_scale(args.pitch);
    if args.verbose {
        config = config.with_log_level(LogLevel::Process);
    }
    let mut session = StretchSession::from_config(&config)?;

    // Study and process the whole file in blocks
    let block_size = 4096;
    let sample_count = input.sample_count();
    let block = |start: usize| -> Result<AudioBuffer, elastic_rs::Error> {
        let end = (start + block_size).min(sample_count);
        let planar = (0..channels)
            .map(|channel| input.channel(channel)[start..end].to_vec())
            .collect::<Vec<_>>();
        AudioBuffer::from_channels(&planar)
    };

    let mut start = 0;
    loop {
        let is_final = start + block_size >= sample_count;
        session.study(&block(start)?, is_final)?;
        if is_final {
            break;
        }
        start += block_size;
    }

    let mut wav_output_samples: Vec<i16> = Vec::new(); // interleaved
    let mut start = 0;
    loop {
        let is_final = start + block_size >= sample_count;
        session.process(&block(start)?, is_final)?;
        // push result to interleaved i16 sample buffer
        let output = session.retrieve(usize::MAX)?;
        wav_output_samples.extend(
            output
                .to_interleaved()
                .into_iter()
                .map(|sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16),
        );
        if is_final {
            break;
        }
        start += block_size;
    }

    // flush remaining output samples
    while !session.is_finished() {
        let output = session.retrieve(block_size)?;
        wav_output_samples.extend(
            output
                .to_interleaved()
                .into_iter()
                .map(|sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16),
        );
    }

    // Write Wav output file
    write(
        output_path,
        &wav_output_samples,
        sample_rate as i32,
        channels as u16,
    )?;

    println!("Done.");

    Ok(())
}
