//! Command-line front end for the spreading pipeline.
//!
//! Requires the `executable` feature.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    process::ExitCode,
};

use bitspread::{
    Backend, ConfigError, Endianness, PipelineConfig, PipelineError, RunReport, Strategy,
    pipeline::{self, ElementReader, ElementSource, GeneratorKind, GeneratorSource},
};
use clap::Parser;

// ARGUMENTS
// ================================================================================================

#[derive(Debug, Parser)]
#[command(name = "bitspread", version, about = "Spread Z_m integers across a fixed output bit width")]
struct Args {
    /// Size of the discrete input domain Z_m
    #[arg(short, long, default_value_t = 1)]
    modulus: u128,

    /// Input element width in bits
    #[arg(long, default_value_t = 8)]
    in_width: u32,

    /// Output element width in bits
    #[arg(long, default_value_t = 8)]
    out_width: u32,

    /// Strategy id (0-18) or name, e.g. `spread_reject`
    #[arg(short, long, default_value = "spread_reject")]
    strategy: Strategy,

    /// Byte order of byte-aligned input elements
    #[arg(long, default_value = "big")]
    endian_in: Endianness,

    /// Byte order of byte-aligned output elements
    #[arg(long, default_value = "big")]
    endian_out: Endianness,

    /// Fix the run for reproducibility; OS entropy when absent
    #[arg(long)]
    seed: Option<u64>,

    /// Cap on input bits consumed, truncated at element boundaries
    #[arg(long)]
    max_input_bits: Option<u64>,

    /// Cap on output bits written, truncated at element boundaries
    #[arg(long)]
    max_output_bits: Option<u64>,

    /// Random backend: `system` or `chacha`
    #[arg(short, long, default_value = "chacha")]
    backend: Backend,

    /// Input: a path, `-` for stdin, or `gen:<spec>` for an internal
    /// generator (`counter[:wrap]`, `uniform`, `biased[:prob[:frac]]`,
    /// `normal`, `cube`)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Output: a path or `-` for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Write hex text lines instead of packed bits
    #[arg(long)]
    hex: bool,
}

impl Args {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            modulus: self.modulus,
            input_width: self.in_width,
            output_width: self.out_width,
            strategy: self.strategy,
            endian_in: self.endian_in,
            endian_out: self.endian_out,
            seed: self.seed,
            max_input_bits: self.max_input_bits,
            max_output_bits: self.max_output_bits,
            backend: self.backend,
            hex_output: self.hex,
        }
    }
}

// ENTRY POINT
// ================================================================================================

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let args = Args::parse();
    let to_stdout = args.output == "-";
    match execute(args) {
        Ok(report) => {
            // Keep the data stream clean when it goes to stdout.
            if to_stdout {
                eprintln!("{report}");
            } else {
                println!("{report}");
            }
            ExitCode::SUCCESS
        },
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        },
    }
}

fn execute(args: Args) -> Result<RunReport, PipelineError> {
    let config = args.config();
    // Fail fast on bad parameters before touching any file.
    config.validate()?;

    let mut source = open_source(&args)?;
    match args.output.as_str() {
        "-" => pipeline::run(&config, source.as_mut(), io::stdout().lock()),
        path => pipeline::run(&config, source.as_mut(), BufWriter::new(File::create(path)?)),
    }
}

fn open_source(args: &Args) -> Result<Box<dyn ElementSource>, PipelineError> {
    if let Some(spec) = args.input.strip_prefix("gen:") {
        let kind = GeneratorKind::parse(spec)?;
        let max_bits = args.max_input_bits.ok_or(ConfigError::UnboundedGenerator)?;
        // Offset the seed so the generator's stream is disjoint from the
        // spreader's streams derived from the same run seed.
        let seed = args.seed.map(|s| s.wrapping_add(0x9E37_79B9_7F4A_7C15));
        let generator = GeneratorSource::new(
            kind,
            args.modulus,
            args.in_width,
            max_bits,
            args.backend.source(seed),
        )?;
        return Ok(Box::new(generator));
    }

    Ok(match args.input.as_str() {
        "-" => Box::new(ElementReader::new(
            io::stdin().lock(),
            args.in_width,
            args.endian_in,
            args.max_input_bits,
        )),
        path => Box::new(ElementReader::new(
            BufReader::new(File::open(path)?),
            args.in_width,
            args.endian_in,
            args.max_input_bits,
        )),
    })
}
