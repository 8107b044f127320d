//! encfs / encfsctl invocations
//!
//! The passphrase reaches encfs through `--extpass`, and the encfs config
//! file location is set per invocation via `ENCFS6_CONFIG`.

use crate::config::{Config, Passphrase};
use crate::error::Result;
use crate::tools::runner::{Invocation, ToolRunner};
use std::ffi::OsStr;
use std::path::Path;
use tracing::debug;

/// Environment variable encfs reads its config location from
pub const ENCFS6_CONFIG_ENV: &str = "ENCFS6_CONFIG";

/// Handle for running encfs tools with one passphrase and config file
#[derive(Debug, Clone)]
pub struct Encfs<'a> {
    passphrase: &'a Passphrase,
    config_file: &'a Path,
}

impl<'a> Encfs<'a> {
    pub fn new(passphrase: &'a Passphrase, config_file: &'a Path) -> Self {
        Encfs {
            passphrase,
            config_file,
        }
    }

    pub fn from_config(config: &'a Config) -> Self {
        Self::new(&config.encfs_pass, &config.encfs6_config)
    }

    fn invocation(&self, program: &str) -> Invocation {
        Invocation::new(program)
            .env(ENCFS6_CONFIG_ENV, self.config_file)
    }

    fn with_extpass(&self, invocation: Invocation) -> Invocation {
        invocation
            .arg("--extpass")
            .secret_arg(extpass_command(self.passphrase))
    }

    /// Map a plaintext relative path to its encrypted name under `root`
    pub fn encode(&self, runner: &dyn ToolRunner, root: &Path, plain: &Path) -> Result<String> {
        let invocation = self
            .with_extpass(self.invocation("encfsctl").arg("encode"))
            .arg(root)
            .arg(plain);
        let encoded = runner.check_output(&invocation)?;
        debug!("Encoded {:?} as {:?}", plain, encoded);
        Ok(encoded)
    }

    /// Map an encrypted relative path back to plaintext
    pub fn decode(&self, runner: &dyn ToolRunner, root: &Path, encoded: &str) -> Result<String> {
        let invocation = self
            .with_extpass(self.invocation("encfsctl").arg("decode"))
            .arg(root)
            .arg(encoded);
        runner.check_output(&invocation)
    }

    /// Mount an encrypted view of the plaintext `source` at `target`
    pub fn mount_reverse(&self, source: &Path, target: &Path) -> Invocation {
        self.with_extpass(self.invocation("encfs"))
            .arg("--reverse")
            .arg(source)
            .arg(target)
    }

    /// Mount a decrypted view of the ciphertext `source` at `target`
    pub fn mount_forward(&self, source: &OsStr, target: &Path) -> Invocation {
        self.with_extpass(self.invocation("encfs"))
            .arg(source)
            .arg(target)
    }
}

/// Shell command encfs runs to obtain the passphrase
fn extpass_command(passphrase: &Passphrase) -> String {
    format!("echo {}", shell_quote(passphrase.expose()))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
