use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::shutdown_requested;
use crate::config::ServerConfig;

/// Run one application server until shutdown, restarting it after exits when
/// configured to. Nothing here is fatal to the daemon.
pub async fn run_server(config: ServerConfig, mut shutdown: watch::Receiver<bool>) {
    loop {
        match spawn_server(&config) {
            Ok(mut child) => {
                info!(
                    "server '{}' started (pid {})",
                    config.name,
                    child.id().unwrap_or_default()
                );
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => warn!("server '{}' exited: {}", config.name, status),
                        Err(err) => error!("server '{}': wait failed: {}", config.name, err),
                    },
                    _ = shutdown_requested(&mut shutdown) => {
                        info!("stopping server '{}'", config.name);
                        if let Err(err) = child.kill().await {
                            warn!("failed to stop server '{}': {}", config.name, err);
                        }
                        return;
                    }
                }
            }
            Err(err) => error!(
                "server '{}': failed to start {:?}: {}",
                config.name, config.command, err
            ),
        }

        if !config.restart_on_exit {
            return;
        }
        info!(
            "restarting server '{}' in {}s",
            config.name, config.restart_delay_secs
        );
        tokio::select! {
            _ = sleep(Duration::from_secs(config.restart_delay_secs)) => {}
            _ = shutdown_requested(&mut shutdown) => return,
        }
    }
}

fn spawn_server(config: &ServerConfig) -> std::io::Result<Child> {
    let Some((program, args)) = config.command.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty server command",
        ));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        forward_lines(config.name.clone(), stdout, false);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(config.name.clone(), stderr, true);
    }
    Ok(child)
}

/// Drain a child's output pipe into the log until EOF. Bytes that are not
/// UTF-8 are replaced; reading continues.
fn forward_lines<R>(name: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if is_stderr {
                        warn!(target: "server", "[{name}] {line}");
                    } else {
                        info!(target: "server", "[{name}] {line}");
                    }
                }
                Err(err) => {
                    warn!("server '{name}': output stream failed: {err}");
                    break;
                }
            }
        }
    });
}
