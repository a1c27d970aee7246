//! Helpers shared by tests across the workspace.

use camino::Utf8PathBuf;
use tempfile::TempDir;

const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn make_from(alphabet: &[u8], len: usize, seed: usize) -> String {
    let mut output = String::with_capacity(len);
    let mut idx = seed % alphabet.len();

    for _ in 0..len {
        output.push(alphabet[idx] as char);
        idx = (idx + 7) % alphabet.len();
    }

    output
}

/// Temporary directory plus its UTF-8 path. Keep the `TempDir` alive for the
/// duration of the test.
#[must_use]
pub fn utf8_temp_dir() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf-8 temp path");
    (temp, path)
}

/// Synthetic API key in the `sk-` shape. Built at runtime so the literal never
/// appears in source.
#[must_use]
pub fn sk_api_key() -> String {
    format!("sk-{}", make_from(ALNUM, 32, 11))
}

#[must_use]
pub fn github_pat() -> String {
    format!("ghp_{}", make_from(ALNUM, 36, 1))
}

#[must_use]
pub fn bearer_header() -> String {
    format!("Authorization: Bearer {}", make_from(ALNUM, 40, 3))
}
