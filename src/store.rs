use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::Session;
use crate::error::{Error, Result};

/// Env var holding the base64-encoded 32-byte session encryption key.
pub const SESSION_KEY_ENV: &str = "MAILGATE_SESSION_KEY";

const SESSION_ROW_KEY: &str = "oauth_session";
const SESSION_KEY_BYTES: usize = 32;
const SESSION_NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

/// Persists the serialized [`Session`] across process restarts.
///
/// Storage and retrieval only; all token lifecycle logic lives in
/// [`crate::auth::Authenticator`]. Sessions are encrypted at rest with
/// AES-256-GCM; if no encryption key is configured, nothing is persisted —
/// tokens never hit disk in plaintext.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("create store directory: {e}")))?;
        }

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_state (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn default_store_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Store("failed to determine home directory".to_string()))?;
        Ok(home.join(".mailgate").join("mailgate.db"))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(key) = encryption_key()? else {
            // No key configured: do not keep token data at rest.
            self.clear()?;
            return Ok(());
        };

        let value = encrypt_session(session, &key)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_state (key, value) VALUES (?, ?)",
            rusqlite::params![SESSION_ROW_KEY, value],
        )?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<Session>> {
        let raw = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT value FROM session_state WHERE key = ?",
                [SESSION_ROW_KEY],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        let Some(key) = encryption_key()? else {
            // Key was removed since the session was written; drop the row.
            self.clear()?;
            return Ok(None);
        };

        match decrypt_session(&raw, &key) {
            Ok(session) => Ok(Some(session)),
            Err(error) => {
                warn!("discarding unreadable persisted session: {error}");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM session_state WHERE key = ?",
            [SESSION_ROW_KEY],
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("session store lock poisoned".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedEnvelope {
    version: u8,
    nonce: String,
    ciphertext: String,
}

fn encryption_key() -> Result<Option<[u8; SESSION_KEY_BYTES]>> {
    let raw = std::env::var(SESSION_KEY_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let Some(raw) = raw else {
        return Ok(None);
    };

    let decoded = BASE64
        .decode(raw)
        .map_err(|e| Error::Store(format!("{SESSION_KEY_ENV} is not valid base64: {e}")))?;
    let key: [u8; SESSION_KEY_BYTES] = decoded
        .try_into()
        .map_err(|_| Error::Store(format!("{SESSION_KEY_ENV} must decode to 32 bytes")))?;
    Ok(Some(key))
}

fn encrypt_session(session: &Session, key_bytes: &[u8; SESSION_KEY_BYTES]) -> Result<String> {
    let mut plaintext = serde_json::to_vec(session)
        .map_err(|e| Error::Store(format!("serialize session: {e}")))?;

    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
        .map_err(|_| Error::Store("construct AES-256-GCM key".to_string()))?;
    let key = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; SESSION_NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| Error::Store("generate session nonce".to_string()))?;

    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut plaintext,
    )
    .map_err(|_| Error::Store("encrypt session".to_string()))?;

    let envelope = EncryptedEnvelope {
        version: ENVELOPE_VERSION,
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(&plaintext),
    };
    serde_json::to_string(&envelope).map_err(|e| Error::Store(format!("serialize envelope: {e}")))
}

fn decrypt_session(raw: &str, key_bytes: &[u8; SESSION_KEY_BYTES]) -> Result<Session> {
    let envelope: EncryptedEnvelope =
        serde_json::from_str(raw).map_err(|e| Error::Store(format!("parse envelope: {e}")))?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::Store(format!(
            "unsupported session envelope version {}",
            envelope.version
        )));
    }

    let nonce_vec = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| Error::Store(format!("decode envelope nonce: {e}")))?;
    let nonce_bytes: [u8; SESSION_NONCE_BYTES] = nonce_vec
        .try_into()
        .map_err(|_| Error::Store("invalid nonce length in session envelope".to_string()))?;
    let mut ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| Error::Store(format!("decode envelope ciphertext: {e}")))?;

    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
        .map_err(|_| Error::Store("construct AES-256-GCM key".to_string()))?;
    let key = LessSafeKey::new(unbound);

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| Error::Store("decrypt session".to_string()))?;

    serde_json::from_slice(plaintext)
        .map_err(|e| Error::Store(format!("parse decrypted session: {e}")))
}
