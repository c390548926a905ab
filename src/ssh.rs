//! # SSH
//!
//! Thin wrapper over `ssh2` for dialing a guest by IP and streaming a
//! command to completion. `prepare` uses it only to prove reachability;
//! `run` uses it to stream the job script.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};
use ssh2::Session;

/// Result of streaming a remote command to completion.
pub struct CommandResult {
    pub exit_status: i32,
}

/// Dials `addr:port`, authenticates with `user`/`password`, and returns
/// an established session. Used by `prepare` to prove reachability (the
/// connection is then dropped) and by `run` to execute the job script.
///
/// The TCP connect itself is bounded by `timeout`: a plain `TcpStream::connect`
/// can hang indefinitely against an address that silently drops SYNs.
pub fn dial(addr: &str, port: u16, user: &str, password: &str, timeout: Duration) -> Result<Session> {
    let socket_addr = (addr, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {addr}:{port}"))?
        .next()
        .with_context(|| format!("no addresses resolved for {addr}:{port}"))?;
    let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
        .with_context(|| format!("connecting to {addr}:{port}"))?;
    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;

    let mut session = Session::new().context("creating SSH session")?;
    session.set_tcp_stream(tcp);
    session.handshake().context("SSH handshake")?;
    session
        .userauth_password(user, password)
        .context("SSH password authentication")?;

    Ok(session)
}

/// Streams `script` to the guest's shell over a new channel, copying
/// remote stdout/stderr to the host's, and returns the remote exit
/// status once the channel closes.
pub fn run_script(session: &Session, script: &str) -> Result<CommandResult> {
    let mut channel = session.channel_session().context("opening SSH channel")?;
    channel.exec(script).context("executing remote script")?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .context("reading remote stdout")?;
    print!("{stdout}");

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .context("reading remote stderr")?;
    eprint!("{stderr}");

    channel.wait_close().context("waiting for SSH channel close")?;
    let exit_status = channel
        .exit_status()
        .context("reading remote exit status")?;

    Ok(CommandResult { exit_status })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_fails_fast_on_unreachable_host() {
        let result = dial("127.0.0.1", 1, "user", "pw", Duration::from_millis(200));
        assert!(result.is_err());
    }
}
