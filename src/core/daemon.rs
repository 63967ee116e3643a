// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    io::{Read, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result, ensure};

use crate::{
    conf::config::Config,
    core::stages::{self, StageContext},
    defs,
};

fn ack(stream: &mut UnixStream, code: u32) {
    if let Err(e) = stream.write_all(&code.to_le_bytes()) {
        log::warn!("Failed to ack stage client: {e}");
    }
}

/// Serve stage requests from init until late-start has run. Each stage runs
/// on its own thread; ordering between stages is enforced externally by init
/// waiting on the unblock file.
pub fn run(config: Config) -> Result<()> {
    let ctx = Arc::new(StageContext::new(config));

    // The policy worker belongs to the daemon, not to a stage. At this point
    // the helper only exists if the image is still mounted from a previous
    // run; post-fs-data re-arms the worker after the fresh mount.
    ctx.workers().spawn_sepolicy(&ctx.config.core_dir());

    let _ = fs::remove_file(defs::SOCKET_PATH);
    let listener = UnixListener::bind(defs::SOCKET_PATH)
        .with_context(|| format!("Failed to bind {}", defs::SOCKET_PATH))?;
    log::info!("Serving boot stages on {}", defs::SOCKET_PATH);

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept: {e}");
                continue;
            }
        };

        let mut buf = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut buf) {
            log::warn!("short stage request: {e}");
            continue;
        }
        let code = u32::from_le_bytes(buf);

        let spawn_stage = |name: &str, f: fn(&StageContext)| {
            let ctx = Arc::clone(&ctx);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || f(&ctx))
                .context("Failed to spawn stage thread")
        };

        match code {
            defs::STAGE_POST_FS => {
                ack(&mut stream, 0);
                handles.push(spawn_stage("post-fs", stages::post_fs)?);
            }
            defs::STAGE_POST_FS_DATA => {
                ack(&mut stream, 0);
                handles.push(spawn_stage("post-fs-data", stages::post_fs_data)?);
            }
            defs::STAGE_LATE_START => {
                ack(&mut stream, 0);
                drop(stream);
                let handle = spawn_stage("late-start", stages::late_start)?;
                if handle.join().is_err() {
                    log::error!("late-start stage panicked");
                }
                break;
            }
            other => {
                log::warn!("unknown stage request: {other}");
                ack(&mut stream, 1);
            }
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            log::error!("stage thread panicked");
        }
    }
    ctx.workers().shutdown();
    let _ = fs::remove_file(defs::SOCKET_PATH);
    log::info!("All boot stages done");
    Ok(())
}

/// Client side of the handshake, used from init scripts: send the stage
/// code, wait for the zero ack.
pub fn request_stage(code: u32) -> Result<()> {
    let mut stream = UnixStream::connect(defs::SOCKET_PATH)
        .with_context(|| format!("Failed to reach the daemon at {}", defs::SOCKET_PATH))?;
    stream.write_all(&code.to_le_bytes())?;

    let mut buf = [0u8; 4];
    stream
        .read_exact(&mut buf)
        .context("No ack from the daemon")?;
    ensure!(
        u32::from_le_bytes(buf) == 0,
        "daemon rejected stage request {code}"
    );
    Ok(())
}
