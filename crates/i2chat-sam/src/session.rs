//! Identity generation and STREAM session creation

use tracing::{info, warn};

use crate::commands::{self, SessionDestination, SignatureType};
use crate::connection::{redact, SamConnection};
use crate::error::{Result, SamError};
use crate::identity::{Identity, IdentityStore};

/// Ask the bridge for a fresh keypair.
///
/// Expects `DEST REPLY PUB=<b64> PRIV=<b64>`. A reply with neither key is
/// a refused generation; one with only a single key, or an empty one,
/// cannot be turned into an identity.
pub async fn generate_destination(
    connection: &mut SamConnection,
    signature_type: SignatureType,
) -> Result<Identity> {
    let reply = connection
        .request(&commands::generate_destination(signature_type))
        .await?;

    let public = reply.get("PUB");
    let private = reply.get("PRIV");
    if public.is_none() && private.is_none() {
        return Err(SamError::KeyGenerationFailed {
            reply: reply.raw().to_string(),
        });
    }

    match (reply.non_empty("PUB"), reply.non_empty("PRIV")) {
        (Some(public), Some(private)) => Identity::new(public, private),
        _ => Err(SamError::KeyExtractionFailed {
            reply: redact(reply.raw()).into_owned(),
        }),
    }
}

/// Load the saved identity, or generate and persist a new one.
///
/// A freshly generated identity is written to `store` before it is
/// returned; if the write fails the identity is not handed out.
pub async fn create_or_load_identity(
    connection: &mut SamConnection,
    store: &IdentityStore,
    signature_type: SignatureType,
) -> Result<Identity> {
    if store.exists() {
        let identity = store.load()?;
        info!(
            "Using existing identity {} from {}",
            identity.short_destination(),
            store.path().display()
        );
        return Ok(identity);
    }

    info!("No saved identity at {}, generating one", store.path().display());
    let identity = generate_destination(connection, signature_type).await?;
    store.save(&identity)?;
    Ok(identity)
}

/// Bind `identity` to a STREAM session named `session_id`.
///
/// SESSION CREATE carries the identity's private key so the bridge reuses
/// the persisted keypair. A non-OK reply is terminal for this attempt;
/// the bridge refuses a live id, so a retry needs a new one.
pub async fn create_session(
    connection: &mut SamConnection,
    session_id: &str,
    identity: &Identity,
    signature_type: SignatureType,
) -> Result<()> {
    let command = commands::create_session(
        session_id,
        SessionDestination::PrivateKey(identity.private_key()),
        signature_type,
    )?;
    let reply = connection.request(&command).await?;

    if !reply.is_ok() {
        warn!("SESSION CREATE for {} rejected: {}", session_id, reply);
        return Err(SamError::SessionCreateFailed {
            reply: reply.raw().to_string(),
        });
    }

    info!("Session {} created", session_id);
    Ok(())
}

/// A live STREAM session on the bridge.
///
/// The session lasts as long as its control connection, so dropping or
/// closing this handle ends it.
#[derive(Debug)]
pub struct Session {
    id: String,
    identity: Identity,
    connection: SamConnection,
}

impl Session {
    /// Run SESSION CREATE on `connection` and keep the connection open for
    /// the lifetime of the returned handle.
    pub async fn create(
        mut connection: SamConnection,
        session_id: &str,
        identity: Identity,
        signature_type: SignatureType,
    ) -> Result<Self> {
        if let Err(e) = create_session(&mut connection, session_id, &identity, signature_type).await
        {
            connection.close().await;
            return Err(e);
        }
        Ok(Session {
            id: session_id.to_string(),
            identity,
            connection,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connection(&self) -> &SamConnection {
        &self.connection
    }

    /// Close the control connection, ending the session on the bridge.
    pub async fn close(mut self) {
        self.connection.close().await;
        info!("Session {} closed", self.id);
    }
}
