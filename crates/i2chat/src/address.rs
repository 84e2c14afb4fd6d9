//! `.b32.i2p` address derivation

use anyhow::{Context, Result};
use data_encoding::{Encoding, Specification, BASE32_NOPAD};
use sha2::{Digest, Sha256};

/// I2P swaps `+/` for `-~` in its base64 alphabet.
const I2P_BASE64_SYMBOLS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~";

fn i2p_base64() -> Result<Encoding> {
    let mut spec = Specification::new();
    spec.symbols.push_str(I2P_BASE64_SYMBOLS);
    spec.encoding().context("Invalid I2P base64 alphabet")
}

/// Hostname for a public destination: base32 of its SHA-256, lowercase,
/// unpadded, with `.b32.i2p` appended.
pub fn b32_address(public_destination: &str) -> Result<String> {
    let trimmed = public_destination.trim().trim_end_matches('=');
    let raw = i2p_base64()?
        .decode(trimmed.as_bytes())
        .context("Public destination is not valid I2P base64")?;

    let hash = Sha256::digest(&raw);
    Ok(format!(
        "{}.b32.i2p",
        BASE32_NOPAD.encode(&hash).to_ascii_lowercase()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b32_uses_i2p_alphabet() {
        let dest = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8gISIjJCUmJygpKissLS4v-~~-";
        assert_eq!(
            b32_address(dest).unwrap(),
            "wcwm5ho6pa3ayrnc7mgim4765p62qdhit5ti5bvdqalnwaiomauq.b32.i2p"
        );
    }

    #[test]
    fn test_b32_accepts_padding() {
        let expected = "hwut7gubut3xwfcvtwwmkkaxgkslnhqc5ml3jumkmfepulrssriq.b32.i2p";
        assert_eq!(b32_address("aGVsbG8gaTJwIQ==").unwrap(), expected);
        assert_eq!(b32_address("aGVsbG8gaTJwIQ").unwrap(), expected);
    }

    #[test]
    fn test_b32_rejects_standard_alphabet() {
        assert!(b32_address("ab+/").is_err());
        assert!(b32_address("not base64!").is_err());
    }
}
