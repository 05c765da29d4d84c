use clap::{Parser, Subcommand};
use std::path::PathBuf;

use telugu_archive::config::ArchiveConfig;
use telugu_archive::constants::DATA_FILE_DOWNLOAD_NAME;
use telugu_archive::recorder::SubmissionLog;
use telugu_archive::serve::serve_archive;
use telugu_archive::storage::StoragePaths;

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect Telugu archive submissions: uploads, recordings and a CSV log")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collection API server
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Data directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the content directories and exit
    InitDirs {
        /// Data directory
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,
    },
    /// Copy the submission log to a file
    ExportLog {
        /// Data directory
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,

        /// Destination file
        #[arg(short, long, default_value = DATA_FILE_DOWNLOAD_NAME)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Serve {
            config,
            data_dir,
            port,
        } => {
            let mut archive_config = match config {
                Some(path) => ArchiveConfig::load(&path)?,
                None => ArchiveConfig::default(),
            };
            if let Some(dir) = data_dir {
                archive_config.data_dir = dir;
            }
            if let Some(port) = port {
                archive_config.api_port = port;
            }
            archive_config.validate()?;
            serve_archive(archive_config)
        }
        Command::InitDirs { data_dir } => {
            let paths = StoragePaths::prepare(&data_dir)?;
            for dir in paths.content_dirs() {
                println!("{}", dir.display());
            }
            Ok(())
        }
        Command::ExportLog { data_dir, output } => {
            let paths = StoragePaths::new(&data_dir);
            let log = SubmissionLog::new(paths.data_file);
            match log.download()? {
                Some(bytes) => {
                    std::fs::write(&output, &bytes)?;
                    println!(
                        "Exported {} submission(s) to {}",
                        log.row_count()?,
                        output.display()
                    );
                    Ok(())
                }
                None => Err(format!("No submissions yet at {}", log.path().display()).into()),
            }
        }
    }
}
