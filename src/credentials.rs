//! # Credentials
//!
//! Generates the per-VM random password and the OS-appropriate cloud-init
//! user-data document. The password is wrapped so it zeroizes on drop
//! once it has served its purpose (written into the Secret and used for
//! the SSH dial).

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ExecutorError;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A generated plaintext password. Holds its bytes as a `String` but
/// zeroizes them on drop so the plaintext does not linger in memory
/// beyond the call sites that need it (Secret creation, SSH auth).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Draws `len.max(32)` characters uniformly from `[a-zA-Z0-9]` using the
/// OS CSPRNG. Fails only on entropy-source failure, which `rand::thread_rng`
/// does not surface as a catchable error on supported platforms, so this
/// is effectively infallible but kept `Result` to match the other
/// components' signatures.
pub fn generate_password(len: usize) -> Result<Password> {
    let len = len.max(32);
    let mut rng = rand::thread_rng();
    let pw: String = (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect();
    Ok(Password(pw))
}

/// Supported guest shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Pwsh,
}

impl Shell {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "bash" => Ok(Shell::Bash),
            "pwsh" => Ok(Shell::Pwsh),
            other => Err(ExecutorError::Config(anyhow!("unsupported shell: {other}")).into()),
        }
    }
}

/// Produces the cloud-init user-data YAML for the given shell. Linux
/// guests get a bcrypt-hashed password and password SSH auth enabled;
/// Windows guests get the plaintext password since Cloudbase-Init has no
/// hashed-password ingestion path, relying on Secret RBAC and TLS for
/// protection in transit and at rest.
pub fn generate_user_data(shell: Shell, user: &str, password: &Password) -> Result<String> {
    match shell {
        Shell::Bash => {
            let hash = bcrypt::hash(password.as_str(), bcrypt::DEFAULT_COST)
                .context("hashing password for cloud-init userdata")?;
            Ok(format!(
                "#cloud-config\n\
                 users:\n\
                 \x20\x20- name: {user}\n\
                 \x20\x20\x20\x20lock_passwd: false\n\
                 \x20\x20\x20\x20passwd: {hash}\n\
                 \x20\x20\x20\x20sudo: ALL=(ALL) NOPASSWD:ALL\n\
                 \x20\x20\x20\x20shell: /bin/bash\n\
                 ssh_pwauth: true\n\
                 chpasswd:\n\
                 \x20\x20expire: false\n"
            ))
        }
        Shell::Pwsh => Ok(format!(
            "#cloud-config\n\
             users:\n\
             \x20\x20- name: {user}\n\
             \x20\x20\x20\x20passwd: {password}\n\
             \x20\x20\x20\x20groups: Administrators\n",
            password = password.as_str()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_domain() {
        for len in [0, 1, 16, 32, 64] {
            let pw = generate_password(len).unwrap();
            assert_eq!(pw.as_str().len(), len.max(32));
            assert!(pw
                .as_str()
                .bytes()
                .all(|b| PASSWORD_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn bcrypt_roundtrip() {
        let pw = generate_password(32).unwrap();
        let hash = bcrypt::hash(pw.as_str(), bcrypt::DEFAULT_COST).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(bcrypt::verify(pw.as_str(), &hash).unwrap());
    }

    #[test]
    fn linux_userdata_has_no_plaintext_and_has_bcrypt() {
        let pw = generate_password(32).unwrap();
        let data = generate_user_data(Shell::Bash, "runner", &pw).unwrap();
        assert!(data.contains("ssh_pwauth: true"));
        assert!(data.contains("sudo: ALL=(ALL) NOPASSWD:ALL"));
        assert!(data.contains("shell: /bin/bash"));
        assert!(data.contains("passwd: $2"));
        assert!(!data.contains(pw.as_str()));
    }

    #[test]
    fn windows_userdata_has_plaintext_and_no_linux_markers() {
        let pw = generate_password(32).unwrap();
        let data = generate_user_data(Shell::Pwsh, "runner", &pw).unwrap();
        assert!(data.contains(pw.as_str()));
        assert!(data.contains("groups: Administrators"));
        for marker in ["sudo:", "/bin/bash", "ssh_pwauth", "chpasswd:", "$2"] {
            assert!(!data.contains(marker));
        }
    }

    #[test]
    fn unsupported_shell_fails() {
        let err = Shell::parse("sh").unwrap_err();
        assert!(err.to_string().contains("unsupported shell"));
    }
}
