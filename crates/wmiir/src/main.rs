use {
    clap::{Parser, Subcommand},
    ixp::{Client, Config, Contents, Node, config::ADDRESS_ENV, dm, io_err, om, res},
    log::error,
    tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
};

mod utils;
use crate::utils::*;

#[derive(Debug, clap::Parser)]
struct Cli {
    /// Server address: unix!/path, tcp!host!port or a socket path
    #[arg(short, long, env = ADDRESS_ENV)]
    address: String,

    /// User name to attach as (defaults to the login name)
    #[arg(short, long)]
    uname: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a file, or the names in a directory
    Read { path: String },
    /// Long listing of a directory, sorted by name
    Ls { path: String },
    /// Copy standard input to a file, one write per line
    Write { path: String },
    /// Write the remaining arguments, joined by spaces, to a file
    Xwrite {
        path: String,
        #[arg(required = true)]
        data: Vec<String>,
    },
    /// Create a file
    Create { path: String },
    /// Remove a file
    Remove { path: String },
}

async fn wmiir_main(
    Cli {
        address,
        uname,
        command,
    }: Cli,
) -> ixp::Result<i32> {
    let mut config = Config::from_env();
    config.address = Some(address);
    if let Some(uname) = uname {
        config.uname = uname;
    }

    let client = Client::connect(&config).await?;
    let mut stdout = io::stdout();

    match command {
        Command::Read { path } => match client.read(&path).await? {
            Contents::Data(data) => stdout.write_all(&data).await?,
            entries => stdout.write_all(entries.to_text().as_bytes()).await?,
        },
        Command::Ls { path } => {
            let listing = match client.read(&path).await? {
                Contents::Entries(entries) => sorted(entries)
                    .iter()
                    .map(|stat| ls_line(stat) + "\n")
                    .collect::<String>(),
                Contents::Data(_) => {
                    return res!(io_err!(NotADirectory, format!("{}: not a directory", path)));
                }
            };
            stdout.write_all(listing.as_bytes()).await?;
        }
        Command::Write { path } => {
            client
                .with_open(&path, om::WRITE, async |node: &mut Node| {
                    let Node::File(file) = node else {
                        return res!(io_err!(IsADirectory, format!("{}: is a directory", path)));
                    };
                    let mut lines = BufReader::new(io::stdin()).lines();
                    while let Some(line) = lines.next_line().await? {
                        file.write(format!("{}\n", line).as_bytes()).await?;
                    }
                    Ok(())
                })
                .await?;
        }
        Command::Xwrite { path, data } => {
            client.write(&path, data.join(" ")).await?;
        }
        Command::Create { path } => client.create(&path, dm::WRITE, om::WRITE).await?,
        Command::Remove { path } => client.remove(&path).await?,
    }

    stdout.flush().await?;
    Ok(0)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = wmiir_main(Cli::parse()).await.unwrap_or_else(|e| {
        error!("{}", e);
        eprintln!("wmiir: {}", e);
        1
    });

    std::process::exit(exit_code);
}
