use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    config::DEFAULT_MAX_LINE_LENGTH,
    message::{LineReader, write_line},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    let mut printer = tokio::spawn(print_server_lines(reader));

    let mut stdin = LineReader::new(BufReader::new(io::stdin()), DEFAULT_MAX_LINE_LENGTH);
    let finished_early = run_client_loop(&mut stdin, &mut writer, &mut printer).await?;
    shutdown_connection(&mut writer).await;

    if !finished_early {
        // The relay closes our stream once it has processed our departure.
        printer.await.context("printer task failed")??;
    }

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(stream.into_split())
}

/// Forwards stdin to the relay. Returns `true` if the session ended without
/// waiting on the printer (server hung up or ctrl-c).
async fn run_client_loop(
    stdin: &mut LineReader<BufReader<io::Stdin>>,
    writer: &mut OwnedWriteHalf,
    printer: &mut JoinHandle<Result<()>>,
) -> Result<bool> {
    loop {
        select! {
            line = stdin.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => write_line(writer, &line)
                        .await
                        .context("failed to send line")?,
                    None => return Ok(false),
                }
            }
            printed = &mut *printer => {
                printed.context("printer task failed")??;
                return Ok(true);
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                return Ok(true);
            }
        }
    }
}

async fn print_server_lines(reader: OwnedReadHalf) -> Result<()> {
    let mut lines = LineReader::new(BufReader::new(reader), DEFAULT_MAX_LINE_LENGTH);
    let mut stdout = io::stdout();
    while let Some(line) = lines.next_line().await? {
        write_line(&mut stdout, &line).await?;
    }
    Ok(())
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}
