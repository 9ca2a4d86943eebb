//! Small helpers shared by the `serve` and `connect` subcommands.

use std::sync::mpsc;
use std::time::Duration;

/// Installs a Ctrl-C handler and hands back a receiver that fires once, when
/// the signal arrives.
pub fn install_ctrlc_handler() -> color_eyre::eyre::Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    Ok(rx)
}

/// Block the calling thread until either `rx` fires or `timeout` elapses.
/// Returns `true` if the signal arrived.
pub fn wait_for(rx: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    rx.recv_timeout(timeout).is_ok()
}

pub fn parse_md5_ha1(username: &str, realm: &str, password: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(format!("{username}:{realm}:{password}").as_bytes());
    hex::encode(hasher.finalize())
}
