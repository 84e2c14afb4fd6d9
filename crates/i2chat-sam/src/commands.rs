//! SAM v3 command encoding and reply parsing
//!
//! Commands and replies are single `\n`-terminated lines of the form
//! `VERB SUBVERB KEY=VALUE ...`. Everything in this module is pure; the
//! control connection is responsible for moving the lines over TCP.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SamError};

/// Line terminator used by the SAM protocol in both directions
pub const LINE_TERMINATOR: u8 = b'\n';

/// Literal DESTINATION value asking the bridge to mint a throwaway keypair
pub const TRANSIENT: &str = "TRANSIENT";

/// Signature algorithms understood by SAM's `SIGNATURE_TYPE` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignatureType {
    #[serde(rename = "DSA_SHA1")]
    DsaSha1,
    #[serde(rename = "ECDSA_SHA256_P256")]
    EcdsaSha256P256,
    #[serde(rename = "ECDSA_SHA384_P384")]
    EcdsaSha384P384,
    #[serde(rename = "ECDSA_SHA512_P521")]
    EcdsaSha512P521,
    #[serde(rename = "RSA_SHA256_2048")]
    RsaSha256_2048,
    #[serde(rename = "RSA_SHA384_3072")]
    RsaSha384_3072,
    #[serde(rename = "RSA_SHA512_4096")]
    RsaSha512_4096,
    #[default]
    #[serde(rename = "EdDSA_SHA512_Ed25519")]
    EdDsaSha512Ed25519,
    #[serde(rename = "EdDSA_SHA512_Ed25519ph")]
    EdDsaSha512Ed25519ph,
    #[serde(rename = "RedDSA_SHA512_Ed25519")]
    RedDsaSha512Ed25519,
}

impl SignatureType {
    /// Numeric code sent on the wire
    pub fn code(self) -> u8 {
        match self {
            SignatureType::DsaSha1 => 0,
            SignatureType::EcdsaSha256P256 => 1,
            SignatureType::EcdsaSha384P384 => 2,
            SignatureType::EcdsaSha512P521 => 3,
            SignatureType::RsaSha256_2048 => 4,
            SignatureType::RsaSha384_3072 => 5,
            SignatureType::RsaSha512_4096 => 6,
            SignatureType::EdDsaSha512Ed25519 => 7,
            SignatureType::EdDsaSha512Ed25519ph => 8,
            SignatureType::RedDsaSha512Ed25519 => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => SignatureType::DsaSha1,
            1 => SignatureType::EcdsaSha256P256,
            2 => SignatureType::EcdsaSha384P384,
            3 => SignatureType::EcdsaSha512P521,
            4 => SignatureType::RsaSha256_2048,
            5 => SignatureType::RsaSha384_3072,
            6 => SignatureType::RsaSha512_4096,
            7 => SignatureType::EdDsaSha512Ed25519,
            8 => SignatureType::EdDsaSha512Ed25519ph,
            11 => SignatureType::RedDsaSha512Ed25519,
            _ => return None,
        })
    }
}

/// A SAM protocol version such as `3.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SamVersion {
    pub major: u8,
    pub minor: u8,
}

impl SamVersion {
    pub const V3_1: SamVersion = SamVersion { major: 3, minor: 1 };
    pub const V3_2: SamVersion = SamVersion { major: 3, minor: 2 };
}

impl fmt::Display for SamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SamVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("expected MAJOR.MINOR, got {:?}", s))?;
        Ok(SamVersion {
            major: major.parse().map_err(|_| format!("bad major version in {:?}", s))?,
            minor: minor.parse().map_err(|_| format!("bad minor version in {:?}", s))?,
        })
    }
}

impl TryFrom<String> for SamVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SamVersion> for String {
    fn from(version: SamVersion) -> Self {
        version.to_string()
    }
}

/// Version range advertised in the HELLO handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: SamVersion,
    pub max: SamVersion,
}

impl Default for VersionRange {
    fn default() -> Self {
        VersionRange {
            min: SamVersion::V3_1,
            max: SamVersion::V3_2,
        }
    }
}

/// Key material named by `SESSION CREATE ... DESTINATION=`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDestination<'a> {
    /// Bridge generates a fresh keypair for the session
    Transient,
    /// Reuse a persisted identity; this is the private key blob, never the
    /// public destination
    PrivateKey(&'a str),
}

impl SessionDestination<'_> {
    fn as_str(&self) -> &str {
        match self {
            SessionDestination::Transient => TRANSIENT,
            SessionDestination::PrivateKey(key) => key,
        }
    }
}

/// `HELLO VERSION MIN=<min> MAX=<max>`
pub fn hello(versions: &VersionRange) -> String {
    format!("HELLO VERSION MIN={} MAX={}\n", versions.min, versions.max)
}

/// `DEST GENERATE SIGNATURE_TYPE=<code>`
pub fn generate_destination(signature_type: SignatureType) -> String {
    format!("DEST GENERATE SIGNATURE_TYPE={}\n", signature_type.code())
}

/// `SESSION CREATE STYLE=STREAM ID=<id> DESTINATION=<key> SIGNATURE_TYPE=<code>`
pub fn create_session(
    session_id: &str,
    destination: SessionDestination<'_>,
    signature_type: SignatureType,
) -> Result<String> {
    validate_session_id(session_id)?;
    validate_destination(destination.as_str())?;
    Ok(format!(
        "SESSION CREATE STYLE=STREAM ID={} DESTINATION={} SIGNATURE_TYPE={}\n",
        session_id,
        destination.as_str(),
        signature_type.code()
    ))
}

/// `STREAM ACCEPT ID=<id>`
pub fn accept_stream(session_id: &str) -> Result<String> {
    validate_session_id(session_id)?;
    Ok(format!("STREAM ACCEPT ID={}\n", session_id))
}

/// `STREAM CONNECT ID=<id> DESTINATION=<dest>`
///
/// `destination` is a remote peer's base64 destination or an address the
/// bridge can resolve (e.g. `name.i2p`).
pub fn connect_stream(session_id: &str, destination: &str) -> Result<String> {
    validate_session_id(session_id)?;
    validate_destination(destination)?;
    Ok(format!(
        "STREAM CONNECT ID={} DESTINATION={}\n",
        session_id, destination
    ))
}

/// Session ids are single non-empty tokens.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.chars().any(char::is_whitespace) {
        return Err(SamError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

fn validate_destination(destination: &str) -> Result<()> {
    if destination.is_empty() || destination.chars().any(char::is_whitespace) {
        return Err(SamError::InvalidDestination(destination.to_string()));
    }
    Ok(())
}

/// A single parsed reply line from the bridge.
///
/// The first two bare tokens are the verb and sub-verb (`HELLO REPLY`,
/// `STREAM STATUS`). Every `KEY=VALUE` token lands in the field map, split
/// on the first `=`. Later bare tokens are recorded as fields with an
/// empty value. Double-quoted values may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    raw: String,
    verb: String,
    subverb: Option<String>,
    fields: HashMap<String, String>,
}

impl Reply {
    /// Decode raw bytes read off the socket and parse them.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(bytes)
            .map_err(|e| SamError::MalformedReply(format!("reply is not valid UTF-8: {}", e)))?;
        Self::parse(line)
    }

    pub fn parse(line: &str) -> Result<Self> {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let tokens = tokenize(&raw)?;
        if tokens.is_empty() {
            return Err(SamError::MalformedReply("empty reply".to_string()));
        }

        let mut verb = None;
        let mut subverb = None;
        let mut fields = HashMap::new();

        for token in tokens {
            match token {
                Token::Bare(word) if verb.is_none() => verb = Some(word),
                Token::Bare(word) if subverb.is_none() && fields.is_empty() => {
                    subverb = Some(word)
                }
                Token::Bare(word) => {
                    fields.insert(word, String::new());
                }
                Token::Pair(key, value) => {
                    fields.insert(key, value);
                }
            }
        }

        let verb = verb.ok_or_else(|| {
            SamError::MalformedReply(format!("reply has no command word: {}", raw))
        })?;

        Ok(Reply {
            raw,
            verb,
            subverb,
            fields,
        })
    }

    /// The reply line as received, minus its terminator
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn subverb(&self) -> Option<&str> {
        self.subverb.as_deref()
    }

    /// True if the reply starts with `verb subverb`
    pub fn is(&self, verb: &str, subverb: &str) -> bool {
        self.verb == verb && self.subverb.as_deref() == Some(subverb)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Field value, treating empty values as absent
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn result(&self) -> Option<&str> {
        self.get("RESULT")
    }

    /// `RESULT=OK` is the protocol's only success signal
    pub fn is_ok(&self) -> bool {
        self.result() == Some("OK")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("MESSAGE")
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Reply {
    type Err = SamError;

    fn from_str(s: &str) -> Result<Self> {
        Reply::parse(s)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Bare(String),
    Pair(String, String),
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        let mut value: Option<String> = None;

        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();

            if let Some(v) = value.as_mut() {
                if c == '"' && v.is_empty() {
                    read_quoted(&mut chars, v, line)?;
                } else {
                    v.push(c);
                }
            } else if c == '=' {
                value = Some(String::new());
            } else {
                key.push(c);
            }
        }

        tokens.push(match value {
            Some(value) => Token::Pair(key, value),
            None => Token::Bare(key),
        });
    }

    Ok(tokens)
}

fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    out: &mut String,
    line: &str,
) -> Result<()> {
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(()),
            '\\' => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => break,
            },
            _ => out.push(c),
        }
    }
    Err(SamError::MalformedReply(format!(
        "unterminated quoted value: {}",
        line
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_default_range() {
        assert_eq!(
            hello(&VersionRange::default()),
            "HELLO VERSION MIN=3.1 MAX=3.2\n"
        );
    }

    #[test]
    fn test_hello_pinned_version() {
        let range = VersionRange {
            min: SamVersion::V3_1,
            max: SamVersion::V3_1,
        };
        assert_eq!(hello(&range), "HELLO VERSION MIN=3.1 MAX=3.1\n");
    }

    #[test]
    fn test_generate_destination() {
        assert_eq!(
            generate_destination(SignatureType::EdDsaSha512Ed25519),
            "DEST GENERATE SIGNATURE_TYPE=7\n"
        );
    }

    #[test]
    fn test_create_session_with_private_key() {
        let cmd = create_session(
            "chat",
            SessionDestination::PrivateKey("PRIVKEY~"),
            SignatureType::default(),
        )
        .unwrap();
        assert_eq!(
            cmd,
            "SESSION CREATE STYLE=STREAM ID=chat DESTINATION=PRIVKEY~ SIGNATURE_TYPE=7\n"
        );
    }

    #[test]
    fn test_create_session_transient() {
        let cmd = create_session("t1", SessionDestination::Transient, SignatureType::default())
            .unwrap();
        assert!(cmd.contains(" DESTINATION=TRANSIENT "));
    }

    #[test]
    fn test_create_session_rejects_bad_ids() {
        for id in ["", "two words", "tab\tid", "nl\n"] {
            let err = create_session(
                id,
                SessionDestination::Transient,
                SignatureType::default(),
            )
            .unwrap_err();
            assert!(matches!(err, SamError::InvalidSessionId(_)), "{:?}", id);
        }
    }

    #[test]
    fn test_stream_commands_separate_parameters() {
        assert_eq!(accept_stream("s1").unwrap(), "STREAM ACCEPT ID=s1\n");
        assert_eq!(
            connect_stream("s1", "peer.i2p").unwrap(),
            "STREAM CONNECT ID=s1 DESTINATION=peer.i2p\n"
        );
    }

    #[test]
    fn test_connect_rejects_empty_destination() {
        assert!(matches!(
            connect_stream("s1", ""),
            Err(SamError::InvalidDestination(_))
        ));
        assert!(matches!(
            connect_stream("s1", "a b"),
            Err(SamError::InvalidDestination(_))
        ));
    }

    #[test]
    fn test_signature_type_codes() {
        assert_eq!(SignatureType::default().code(), 7);
        assert_eq!(SignatureType::RedDsaSha512Ed25519.code(), 11);
        for code in 0..=12u8 {
            if let Some(sig) = SignatureType::from_code(code) {
                assert_eq!(sig.code(), code);
            }
        }
        assert_eq!(SignatureType::from_code(9), None);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("3.2".parse::<SamVersion>().unwrap(), SamVersion::V3_2);
        assert!("3".parse::<SamVersion>().is_err());
        assert!("x.1".parse::<SamVersion>().is_err());
    }

    #[test]
    fn test_parse_hello_reply() {
        let reply = Reply::parse("HELLO REPLY RESULT=OK VERSION=3.1\n").unwrap();
        assert!(reply.is("HELLO", "REPLY"));
        assert!(reply.is_ok());
        assert_eq!(reply.get("VERSION"), Some("3.1"));
        assert_eq!(reply.raw(), "HELLO REPLY RESULT=OK VERSION=3.1");
    }

    #[test]
    fn test_parse_splits_on_first_equals() {
        let reply = Reply::parse("DEST REPLY PUB=AAAA== PRIV=BB=B=").unwrap();
        assert_eq!(reply.get("PUB"), Some("AAAA=="));
        assert_eq!(reply.get("PRIV"), Some("BB=B="));
    }

    #[test]
    fn test_parse_quoted_message() {
        let reply = Reply::parse(
            r#"SESSION STATUS RESULT=DUPLICATED_ID MESSAGE="Session already exists""#,
        )
        .unwrap();
        assert!(!reply.is_ok());
        assert_eq!(reply.result(), Some("DUPLICATED_ID"));
        assert_eq!(reply.message(), Some("Session already exists"));
    }

    #[test]
    fn test_parse_escaped_quote() {
        let reply = Reply::parse(r#"X Y MESSAGE="say \"hi\"""#).unwrap();
        assert_eq!(reply.message(), Some(r#"say "hi""#));
    }

    #[test]
    fn test_parse_bare_tokens_after_fields() {
        let reply = Reply::parse("STREAM STATUS RESULT=OK EXTRA").unwrap();
        assert_eq!(reply.get("EXTRA"), Some(""));
        assert_eq!(reply.non_empty("EXTRA"), None);
    }

    #[test]
    fn test_parse_peer_destination_line() {
        let reply = Reply::parse("abcd~efgh FROM_PORT=0 TO_PORT=0\n").unwrap();
        assert_eq!(reply.verb(), "abcd~efgh");
        assert_eq!(reply.subverb(), None);
        assert_eq!(reply.get("FROM_PORT"), Some("0"));
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(matches!(Reply::parse(""), Err(SamError::MalformedReply(_))));
        assert!(matches!(
            Reply::parse("   \r\n"),
            Err(SamError::MalformedReply(_))
        ));
        assert!(matches!(
            Reply::parse(r#"X Y MESSAGE="open"#),
            Err(SamError::MalformedReply(_))
        ));
        assert!(matches!(
            Reply::decode(&[0xff, 0xfe, b'\n']),
            Err(SamError::MalformedReply(_))
        ));
    }
}
