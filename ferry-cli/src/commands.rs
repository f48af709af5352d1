use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::ArgMatches;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serde_json::Value;
use tokio::time::Instant;

use ferry_core::{ChunkProgress, CodecLink, Command, Envelope, MessageKind};
use ferry_transport::{Broker, ChunkCodec, CodecConfig, TcpPubSub};

use crate::utils::{entry_row, format_size, short_timestamp};

/// One connected control session: a codec over a broker channel, plus the
/// bookkeeping needed to pair commands with their replies.
pub struct Session {
    link: CodecLink,
    timeout: Duration,
}

/// Something the channel delivered while a reply was pending.
pub enum Incoming {
    Envelope(Envelope),
    Telemetry(Vec<ChunkProgress>),
}

/// A successful reply, as the flat JSON document the agent published.
pub struct Reply {
    pub value: Value,
    pub origin: Option<String>,
}

/// Delivery progress the agent reported for an in-flight command.
pub struct ProgressReport {
    pub received: u64,
    pub total: u64,
    pub complete: bool,
}

impl Session {
    /// Connects using the global `--broker`, `--channel` and `--timeout`
    /// arguments.
    pub async fn connect_from(matches: &ArgMatches) -> Result<Self> {
        let broker = matches.get_one::<String>("broker").unwrap();
        let channel = matches.get_one::<String>("channel").unwrap();
        let timeout = matches.get_one::<String>("timeout").unwrap().parse::<u64>()?;

        let device_id = format!("ctl-{:08x}", fastrand::u32(..));
        let transport = TcpPubSub::connect(broker, channel)
            .await
            .with_context(|| format!("failed to connect to broker at {}", broker))?;
        info!("session {} on channel {} via {}", device_id, channel, broker);

        let (link, _codec_task) = ChunkCodec::spawn(transport, CodecConfig::new(device_id));
        Ok(Self {
            link,
            timeout: Duration::from_secs(timeout),
        })
    }

    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Publishes one command as a text message.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let body = serde_json::to_string(command).context("failed to encode command")?;
        self.link
            .outbound
            .send(Envelope::text(body))
            .await
            .map_err(|_| anyhow!("codec task is gone"))?;
        Ok(())
    }

    /// The next reassembled envelope or telemetry batch, or an error once
    /// the deadline passes.
    pub async fn next_incoming(&mut self, deadline: Instant) -> Result<Incoming> {
        let link = &mut self.link;
        tokio::time::timeout_at(deadline, async {
            tokio::select! {
                maybe = link.inbound.recv() => maybe.map(Incoming::Envelope),
                maybe = link.telemetry.recv() => maybe.map(Incoming::Telemetry),
            }
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for the agent (is ferryd running?)"))?
        .ok_or_else(|| anyhow!("lost the connection to the broker"))
    }

    /// Waits for the reply carrying `expect_action`; delivery progress goes
    /// to `on_progress`. An error reply becomes `Err` with the agent's
    /// message.
    pub async fn wait_for_reply(
        &mut self,
        expect_action: &str,
        mut on_progress: impl FnMut(ProgressReport),
    ) -> Result<Reply> {
        let deadline = self.deadline();
        loop {
            let envelope = match self.next_incoming(deadline).await? {
                Incoming::Envelope(envelope) => envelope,
                Incoming::Telemetry(_) => continue,
            };
            if envelope.kind != MessageKind::Text {
                debug!("ignoring {} message while waiting for a reply", envelope.kind);
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(&envelope.body) else {
                debug!("ignoring non-JSON text message");
                continue;
            };
            match value["action"].as_str().unwrap_or_default() {
                action if action == expect_action => {
                    if value["status"] == "error" {
                        bail!(
                            "{}",
                            value["message"].as_str().unwrap_or("agent reported an error")
                        );
                    }
                    return Ok(Reply {
                        origin: envelope.origin_device_id,
                        value,
                    });
                }
                "upload-progress" => on_progress(ProgressReport {
                    received: value["received"].as_u64().unwrap_or(0),
                    total: value["total"].as_u64().unwrap_or(0),
                    complete: value["complete"].as_bool().unwrap_or(false),
                }),
                "error" | "unknown" => {
                    bail!(
                        "{}",
                        value["message"].as_str().unwrap_or("agent rejected the command")
                    );
                }
                other => debug!("ignoring reply for action {}", other),
            }
        }
    }
}

fn progress_bar(enabled: bool) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} chunks ({percent}%) {msg}",
        )
        .unwrap(),
    );
    Some(bar)
}

fn update_bar(bar: &Option<ProgressBar>, report: ProgressReport) {
    let Some(bar) = bar else { return };
    if bar.length().unwrap_or(0) != report.total {
        bar.set_length(report.total);
        bar.set_message("Delivering");
    }
    bar.set_position(report.received);
    if report.complete {
        bar.finish_with_message("Delivered");
    }
}

fn update_bar_from_sample(bar: &Option<ProgressBar>, sample: &ChunkProgress) {
    let Some(bar) = bar else { return };
    let total = u64::from(sample.chunk_count);
    let received = (sample.progress_percent / 100.0 * sample.chunk_count as f64).round() as u64;
    if bar.length().unwrap_or(0) != total {
        bar.set_length(total);
        bar.set_message("Receiving");
    }
    bar.set_position(received.min(total));
}

pub async fn handle_ping(matches: &ArgMatches) -> Result<()> {
    let mut session = Session::connect_from(matches).await?;
    let started = std::time::Instant::now();
    session.send(&Command::Ping).await?;
    let reply = session.wait_for_reply("pong", |_| {}).await?;

    println!(
        "pong from {} in {} ms (agent time {})",
        reply.origin.as_deref().unwrap_or("<unknown>"),
        started.elapsed().as_millis(),
        short_timestamp(reply.value["timestamp"].as_str().unwrap_or("-")),
    );
    Ok(())
}

pub async fn handle_list(matches: &ArgMatches) -> Result<()> {
    let path = matches.get_one::<String>("path").cloned();

    let mut session = Session::connect_from(matches).await?;
    session.send(&Command::List { path }).await?;
    let reply = session.wait_for_reply("list", |_| {}).await?;

    let empty = Vec::new();
    let files = reply.value["files"].as_array().unwrap_or(&empty);
    println!(
        "{} entries in /{}",
        files.len(),
        reply.value["path"].as_str().unwrap_or(""),
    );
    for entry in files {
        println!("{}", entry_row(entry));
    }
    Ok(())
}

pub async fn handle_upload(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<String>("file").unwrap();
    let path = matches.get_one::<String>("path").cloned();
    let show_progress = matches.get_flag("progress");

    let local = Path::new(file);
    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("failed to read {}", file))?;
    let file_name = match matches.get_one::<String>("name") {
        Some(name) => name.clone(),
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("cannot derive a file name from {}", file))?
            .to_string(),
    };
    info!("uploading {} ({})", file_name, format_size(data.len() as u64));

    let mut session = Session::connect_from(matches).await?;
    session
        .send(&Command::Upload {
            file_name,
            data: BASE64.encode(&data),
            path,
        })
        .await?;

    let bar = progress_bar(show_progress);
    let reply = session
        .wait_for_reply("upload", |report| update_bar(&bar, report))
        .await?;
    if let Some(bar) = &bar {
        if !bar.is_finished() {
            bar.finish_and_clear();
        }
    }

    println!(
        "uploaded {} ({}) to /{}",
        reply.value["fileName"].as_str().unwrap_or("?"),
        format_size(reply.value["size"].as_u64().unwrap_or(0)),
        reply.value["path"].as_str().unwrap_or(""),
    );
    Ok(())
}

pub async fn handle_download(matches: &ArgMatches) -> Result<()> {
    let file_name = matches.get_one::<String>("file").unwrap().clone();
    let path = matches.get_one::<String>("path").cloned();
    let output = matches
        .get_one::<String>("output")
        .cloned()
        .unwrap_or_else(|| file_name.clone());
    let show_progress = matches.get_flag("progress");

    let mut session = Session::connect_from(matches).await?;
    session
        .send(&Command::Download {
            file_name: file_name.clone(),
            path,
        })
        .await?;

    let bar = progress_bar(show_progress);
    let deadline = session.deadline();
    let mut saved: Option<u64> = None;

    // The agent publishes the file body as its own message, then the ack.
    loop {
        match session.next_incoming(deadline).await? {
            Incoming::Telemetry(batch) => {
                if let Some(sample) = batch.iter().max_by_key(|s| s.chunk_count) {
                    update_bar_from_sample(&bar, sample);
                }
            }
            Incoming::Envelope(envelope) => match envelope.kind {
                MessageKind::File if envelope.file_name.as_deref() == Some(&file_name) => {
                    let bytes = BASE64
                        .decode(envelope.body.as_bytes())
                        .context("agent sent undecodable file data")?;
                    tokio::fs::write(&output, &bytes)
                        .await
                        .with_context(|| format!("failed to write {}", output))?;
                    saved = Some(bytes.len() as u64);
                    if let Some(bar) = &bar {
                        bar.finish_with_message("Received");
                    }
                }
                MessageKind::Text => {
                    let Ok(value) = serde_json::from_str::<Value>(&envelope.body) else {
                        continue;
                    };
                    match value["action"].as_str().unwrap_or_default() {
                        "download" | "error" | "unknown" => {
                            if value["status"] == "error" {
                                bail!(
                                    "{}",
                                    value["message"].as_str().unwrap_or("download failed")
                                );
                            }
                            let Some(size) = saved else {
                                bail!("agent acknowledged the download but the file never arrived");
                            };
                            println!(
                                "downloaded {} ({}) to {}",
                                file_name,
                                format_size(size),
                                output
                            );
                            return Ok(());
                        }
                        other => debug!("ignoring reply for action {}", other),
                    }
                }
                _ => {}
            },
        }
    }
}

pub async fn handle_delete(matches: &ArgMatches) -> Result<()> {
    let file_name = matches.get_one::<String>("file").unwrap().clone();
    let path = matches.get_one::<String>("path").cloned();

    let mut session = Session::connect_from(matches).await?;
    session.send(&Command::Delete { file_name, path }).await?;
    let reply = session.wait_for_reply("delete", |_| {}).await?;

    println!(
        "deleted {} from /{}",
        reply.value["fileName"].as_str().unwrap_or("?"),
        reply.value["path"].as_str().unwrap_or(""),
    );
    Ok(())
}

pub async fn handle_mkdir(matches: &ArgMatches) -> Result<()> {
    let dir_name = matches.get_one::<String>("dir").unwrap().clone();
    let path = matches.get_one::<String>("path").cloned();

    let mut session = Session::connect_from(matches).await?;
    session.send(&Command::Mkdir { dir_name, path }).await?;
    let reply = session.wait_for_reply("mkdir", |_| {}).await?;

    println!(
        "created directory {} in /{}",
        reply.value["dirName"].as_str().unwrap_or("?"),
        reply.value["path"].as_str().unwrap_or(""),
    );
    Ok(())
}

pub async fn handle_info(matches: &ArgMatches) -> Result<()> {
    let file_name = matches.get_one::<String>("file").unwrap().clone();
    let path = matches.get_one::<String>("path").cloned();

    let mut session = Session::connect_from(matches).await?;
    session.send(&Command::Info { file_name, path }).await?;
    let reply = session.wait_for_reply("info", |_| {}).await?;

    let entry = &reply.value;
    let is_dir = entry["isDirectory"].as_bool().unwrap_or(false);
    println!("name:     {}", entry["name"].as_str().unwrap_or("?"));
    println!("type:     {}", if is_dir { "directory" } else { "file" });
    println!(
        "size:     {}",
        format_size(entry["size"].as_u64().unwrap_or(0))
    );
    println!(
        "created:  {}",
        short_timestamp(entry["created"].as_str().unwrap_or("-"))
    );
    println!(
        "modified: {}",
        short_timestamp(entry["modified"].as_str().unwrap_or("-"))
    );
    Ok(())
}

pub async fn handle_rename(matches: &ArgMatches) -> Result<()> {
    let old_name = matches.get_one::<String>("old").unwrap().clone();
    let new_name = matches.get_one::<String>("new").unwrap().clone();
    let path = matches.get_one::<String>("path").cloned();

    let mut session = Session::connect_from(matches).await?;
    session
        .send(&Command::Rename {
            old_name: old_name.clone(),
            new_name,
            path,
        })
        .await?;
    let reply = session.wait_for_reply("rename", |_| {}).await?;

    println!(
        "renamed {} to {}",
        old_name,
        reply.value["name"].as_str().unwrap_or("?"),
    );
    Ok(())
}

/// Runs the pub/sub broker in the foreground until interrupted.
pub async fn handle_broker(matches: &ArgMatches) -> Result<()> {
    let listen = matches.get_one::<String>("listen").unwrap();
    let broker = Broker::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    println!("broker listening on {}", broker.local_addr());
    println!("press ctrl+c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    broker.shutdown();
    Ok(())
}
