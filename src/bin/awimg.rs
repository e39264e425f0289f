use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use awimg::formats::imagewty::unpack::{OutputFormat, Unpacker};
use awimg::formats::imagewty::{ImageFile, LoadOptions};
use awimg::partition::PartitionTable;

#[derive(Parser, Debug)]
#[command(name = "awimg", version, about = "Allwinner IMAGEWTY firmware image tool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract files from an image file
    Unpack {
        /// Input image file
        #[arg(short = 'i', long = "input")]
        input: String,
        /// Output directory
        #[arg(short = 'o', long = "output")]
        output: String,
        /// Output layout: unimg or imgrepacker
        #[arg(long, default_value = "unimg")]
        format: String,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Decrypt an encrypted image file
    Decrypt {
        /// Input image file
        #[arg(short = 'i', long = "input")]
        input: String,
        /// Output image file
        #[arg(short = 'o', long = "output")]
        output: String,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show the partition table carried in an image
    Partition {
        /// Input image file
        #[arg(short = 'i', long = "input")]
        input: String,
        /// Write the table here instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<String>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Pack a directory into an image file (not implemented)
    Pack {
        /// Input directory
        #[arg(short = 'i', long = "input")]
        input: String,
        /// Output image file
        #[arg(short = 'o', long = "output")]
        output: String,
        /// Write the image without the RC6 envelope
        #[arg(long)]
        no_encrypt: bool,
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Command::Unpack {
            input,
            output,
            format,
            verbose,
        } => {
            let image = ImageFile::load_from_file(&input, &LoadOptions { decrypt: true, verbose })?;
            if verbose {
                println!(
                    "Loaded {} ({} files, encrypted: {})",
                    input,
                    image.num_files(),
                    image.is_encrypted()
                );
            }
            Unpacker::new(&image, input.as_str())
                .with_format(OutputFormat::from_name(&format))
                .with_verbose(verbose)
                .unpack(&output)?;
            println!("Unpacked {} files to {}", image.num_files(), output);
            Ok(())
        }
        Command::Decrypt {
            input,
            output,
            verbose,
        } => {
            let image = ImageFile::load_from_file(&input, &LoadOptions { decrypt: true, verbose })?;
            let mut out = File::create(&output)?;
            image.write_decrypted(&mut out)?;
            println!("Decrypted image written to {}", output);
            Ok(())
        }
        Command::Partition {
            input,
            output,
            verbose,
        } => {
            println!("Reading sys_partition.fex from image...");
            let image = ImageFile::load_from_file(&input, &LoadOptions { decrypt: true, verbose })?;
            let entry = image
                .find_by_filename("sys_partition.fex")
                .ok_or("no sys_partition.fex in the image")?;
            let table = PartitionTable::parse_from_data(image.file_bytes(entry))?;

            let dump = table.dump_to_string();
            match output {
                Some(path) => {
                    File::create(&path)?.write_all(dump.as_bytes())?;
                    println!("Partition table written to {}", path);
                }
                None => print!("{}", dump),
            }
            Ok(())
        }
        Command::Pack { .. } => Err(
            "pack is not implemented: the producer-side encryption/rounding order is unspecified"
                .into(),
        ),
    }
}
