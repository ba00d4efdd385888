//! Certificates and user database for enterprise authentication
//!
//! Generated with easy-rsa into a fixed directory that the access point
//! configuration refers to. The client certificate and the server key are
//! protected with the same password.

use std::path::Path;

use super::capabilities::EASY_RSA;
use super::supervisor::{Cleanup, ProcessSupervisor};
use crate::common::{Error, Result};

/// Password protecting the generated private keys
pub const KEY_PASSWORD: &str = "passw0rd";

/// Name of the client certificate
pub const CLIENT: &str = "client";

/// Accounts accepted for password-based EAP
pub const ACCOUNTS: &[(&str, &str)] = &[("account1", "password1"), ("account2", "password2")];

/// hostapd EAP user database
pub fn eap_user_file() -> String {
    let mut users = String::from("* PEAP,TLS\n\n");
    for (user, password) in ACCOUNTS {
        users.push_str(&format!("\"{}\" MSCHAPV2 \"{}\" [2]\n", user, password));
    }
    users
}

async fn easy_rsa(dir: &Path, args: &[&str], envs: &[(&str, String)]) -> Result<()> {
    let output = tokio::process::Command::new(EASY_RSA)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| Error::Spawn {
            program: EASY_RSA.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("easyrsa {}", args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Generate CA, server and client certificates plus DH parameters
pub async fn prepare(sup: &mut ProcessSupervisor, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    sup.push(Cleanup::RemoveDir(dir.to_path_buf()));
    std::fs::write(dir.join("hostapd.eap_user"), eap_user_file())?;

    let batch = ("EASYRSA_BATCH", "1".to_string());
    let passout = ("EASYRSA_PASSOUT", format!("pass:{}", KEY_PASSWORD));

    tracing::info!(dir = %dir.display(), "Generating certificates");
    easy_rsa(dir, &["init-pki"], &[]).await?;
    easy_rsa(dir, &["build-ca", "nopass"], &[batch.clone()]).await?;
    easy_rsa(dir, &["build-server-full", "server"], &[passout.clone(), batch.clone()]).await?;
    easy_rsa(dir, &["build-client-full", CLIENT], &[passout, batch]).await?;
    easy_rsa(dir, &["gen-dh"], &[]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eap_user_file() {
        assert_eq!(
            eap_user_file(),
            "* PEAP,TLS\n\n\"account1\" MSCHAPV2 \"password1\" [2]\n\"account2\" MSCHAPV2 \"password2\" [2]\n"
        );
    }
}
