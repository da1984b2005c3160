#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use structopt::StructOpt;

use ripflate::{Compression, Format};

////////////////////////////////////////////////////////////////////////////////

#[derive(StructOpt, Debug)]
#[structopt(name = "ripflate", about = "DEFLATE, zlib and gzip compressor")]
struct Opts {
    /// Decompress instead of compressing
    #[structopt(short, long)]
    decompress: bool,

    /// Container format: raw, zlib or gzip
    #[structopt(short, long, default_value = "gzip")]
    format: Format,

    /// Compression level, 0 (stored) to 9 (best)
    #[structopt(short, long, default_value = "6")]
    level: u32,

    /// Output file, stdout if not present
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// Verbose mode (-v, -vv, -vvv, etc)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Silence all output
    #[structopt(short, long)]
    quiet: bool,

    /// Input file, stdin if not present
    #[structopt(parse(from_os_str))]
    input: Option<PathBuf>,
}

fn read_input(path: &Option<PathBuf>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match path {
        Some(path) => {
            File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
        None => {
            io::stdin()
                .lock()
                .read_to_end(&mut data)
                .context("failed to read stdin")?;
        }
    }
    Ok(data)
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn main() -> Result<()> {
    let opts = Opts::from_args();

    stderrlog::new()
        .module(module_path!())
        .quiet(opts.quiet)
        .verbosity(opts.verbose)
        .init()?;
    debug!("{:?}", opts);

    let data = read_input(&opts.input)?;
    let mut output = open_output(&opts.output)?;

    if opts.decompress {
        ripflate::decompress(&data, opts.format, &mut output)
            .with_context(|| format!("failed to decompress {:?} stream", opts.format))?;
    } else {
        ripflate::compress(&data, opts.format, Compression::new(opts.level), &mut output)
            .with_context(|| format!("failed to compress as {:?}", opts.format))?;
    }

    output.flush().context("failed to flush output")?;
    Ok(())
}
