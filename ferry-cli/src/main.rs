use std::process;

use clap::{Arg, ArgMatches, Command};
use log::error;

mod commands;
mod utils;

use commands::*;

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = Command::new("ferry")
        .version("0.1.0")
        .about("Ferry CLI - drive a remote filesystem agent over a shared pub/sub channel")
        .arg(
            Arg::new("broker")
                .short('b')
                .long("broker")
                .value_name("ADDR")
                .help("Broker address")
                .default_value("127.0.0.1:7337")
                .global(true),
        )
        .arg(
            Arg::new("channel")
                .long("channel")
                .value_name("NAME")
                .help("Channel the agent listens on")
                .default_value("ferry")
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECONDS")
                .help("How long to wait for a reply (default: 10)")
                .default_value("10")
                .global(true),
        )
        .subcommand(Command::new("ping").about("Check that the agent is alive"))
        .subcommand(
            Command::new("list")
                .about("List a directory on the agent")
                .arg(Arg::new("path").help("Directory path, relative to the storage root")),
        )
        .subcommand(
            Command::new("upload")
                .about("Send a local file to the agent")
                .arg(Arg::new("file").required(true).help("Local file to send"))
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Name to store the file under (default: the local name)"),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Target directory on the agent"),
                )
                .arg(
                    Arg::new("progress")
                        .short('p')
                        .long("progress")
                        .help("Show delivery progress")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Fetch a file from the agent")
                .arg(Arg::new("file").required(true).help("Remote file name"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Local path to write (default: the remote name)"),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Directory on the agent holding the file"),
                )
                .arg(
                    Arg::new("progress")
                        .short('p')
                        .long("progress")
                        .help("Show transfer progress")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Remove a file or directory on the agent")
                .arg(Arg::new("file").required(true).help("Entry to remove"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Directory on the agent holding the entry"),
                ),
        )
        .subcommand(
            Command::new("mkdir")
                .about("Create a directory on the agent")
                .arg(Arg::new("dir").required(true).help("Directory name"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Parent directory on the agent"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show metadata for a file or directory")
                .arg(Arg::new("file").required(true).help("Entry to inspect"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Directory on the agent holding the entry"),
                ),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename a file or directory on the agent")
                .arg(Arg::new("old").required(true).help("Current name"))
                .arg(Arg::new("new").required(true).help("New name"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("DIR")
                        .help("Directory on the agent holding the entry"),
                ),
        )
        .subcommand(
            Command::new("broker")
                .about("Run the pub/sub broker in the foreground")
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .value_name("ADDR")
                        .help("Address to listen on")
                        .default_value("127.0.0.1:7337"),
                ),
        )
        .get_matches();

    if let Err(e) = run_command(&matches).await {
        error!("Command failed: {:#}", e);
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

async fn run_command(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("ping", sub_matches)) => handle_ping(sub_matches).await,
        Some(("list", sub_matches)) => handle_list(sub_matches).await,
        Some(("upload", sub_matches)) => handle_upload(sub_matches).await,
        Some(("download", sub_matches)) => handle_download(sub_matches).await,
        Some(("delete", sub_matches)) => handle_delete(sub_matches).await,
        Some(("mkdir", sub_matches)) => handle_mkdir(sub_matches).await,
        Some(("info", sub_matches)) => handle_info(sub_matches).await,
        Some(("rename", sub_matches)) => handle_rename(sub_matches).await,
        Some(("broker", sub_matches)) => handle_broker(sub_matches).await,
        _ => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
