//! Key-generation CLI for sb-broker (§6), grounded directly on
//! `sb-makekey.c`'s `add` command: creates `.keys/` (mode 0700, must not
//! pre-exist) and writes the five key files it expects at server startup.
//!
//! ```text
//! sb-makekey add
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sb_broker_crypto::LongTermKeyPair;

#[derive(Parser, Debug)]
#[command(name = "sb-makekey", about = "Manages plugins.", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory to create the key material under.
    #[arg(long, default_value = ".keys", global = true)]
    keys_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a new API key to the database.
    Add,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // The source's `main` treats a missing argv[0] (no subcommand reachable)
    // as a no-op usage print with exit 0, not an error (§6 supplement).
    let Some(Command::Add) = cli.command else {
        print_usage();
        std::process::exit(0);
    };

    if let Err(e) = add(&cli.keys_dir) {
        tracing::error!(error = %e, "key generation aborted");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        "Usage: sb-makekey [add]\n\n\
         Manages plugins.\n\n\
         Commands:\n\
         \x20 add  add a new API key to database"
    );
}

/// Writes the five files from spec §6, aborting (nonzero exit, surfaced by
/// the caller) if the directory already exists or any write fails — the
/// source never attempts a partial cleanup on failure, and neither do we.
fn add(dir: &Path) -> std::io::Result<()> {
    fs::create_dir(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;

    let longterm = LongTermKeyPair::generate();

    write_key_file(dir, "server-long-term.pub", &longterm.public(), 0o644)?;
    write_key_file(dir, "server-long-term", &longterm.secret_bytes(), 0o600)?;
    write_key_file(dir, "lock", &[0u8; 1], 0o600)?;

    let mut noncekey = [0u8; 32];
    getrandom::getrandom(&mut noncekey).expect("getrandom failed");
    write_key_file(dir, "noncekey", &noncekey, 0o600)?;
    write_key_file(dir, "noncecounter", &[0u8; 8], 0o600)?;

    tracing::info!(dir = %dir.display(), "wrote server key material");
    Ok(())
}

fn write_key_file(dir: &Path, name: &str, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let path = dir.join(name);
    fs::write(&path, bytes)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_creates_all_five_files_with_expected_modes() {
        let tmp = std::env::temp_dir().join(format!("sb-makekey-test-{}", std::process::id()));
        let dir = tmp.join(".keys");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        add(&dir).expect("add should succeed against a fresh directory");

        let expect_mode = |name: &str, expected: u32| {
            let meta = fs::metadata(dir.join(name)).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, expected, "mode of {name}");
        };
        expect_mode("server-long-term.pub", 0o644);
        expect_mode("server-long-term", 0o600);
        expect_mode("lock", 0o600);
        expect_mode("noncekey", 0o600);
        expect_mode("noncecounter", 0o600);

        assert_eq!(fs::read(dir.join("server-long-term.pub")).unwrap().len(), 32);
        assert_eq!(fs::read(dir.join("server-long-term")).unwrap().len(), 32);
        assert_eq!(fs::read(dir.join("noncecounter")).unwrap(), vec![0u8; 8]);

        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn add_fails_if_directory_already_exists() {
        let tmp = std::env::temp_dir().join(format!("sb-makekey-test-exists-{}", std::process::id()));
        let dir = tmp.join(".keys");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&dir).unwrap();

        assert!(add(&dir).is_err());

        fs::remove_dir_all(&tmp).unwrap();
    }
}
