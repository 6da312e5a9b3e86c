//! Olm session management
//!
//! This module owns end-to-end session establishment, independent of the
//! tunnel transport:
//! - Session material generation (X25519 static keypair)
//! - Session fingerprinting (BLAKE3 over the public key and client identity)
//! - Teardown with zeroization
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --init_session--> Initialized --reset--> Uninitialized
//!                                     |
//!                                     +--init_session--> AlreadyInitialized (material kept)
//! ```
//!
//! Replacing material while a tunnel runs would desynchronize encrypted state
//! with peers, so a second init is refused rather than applied.

use std::fmt;
use std::time::SystemTime;

use rand_core::{CryptoRng, OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{InitConfig, LogLevel};
use crate::error::{Result, TunnelError};

/// Domain separator for session fingerprints
const FINGERPRINT_CONTEXT: &str = "pangolin olm session fingerprint v1";

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session material
    Uninitialized,
    /// Material generated and ready for tunnel start
    Initialized,
}

/// X25519 session secret (32 bytes), zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SessionSecret(x25519_dalek::StaticSecret);

/// Opaque session material owned by the [`SessionManager`]
pub struct SessionMaterial {
    secret: SessionSecret,
    fingerprint: [u8; 32],
}

impl SessionMaterial {
    /// Generate fresh material bound to the client identity in `config`
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, config: &InitConfig) -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rng);
        let public = x25519_dalek::PublicKey::from(&secret);

        let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
        hasher.update(public.as_bytes());
        hasher.update(config.agent.as_bytes());
        hasher.update(&[0]);
        hasher.update(config.version.as_bytes());
        let fingerprint = *hasher.finalize().as_bytes();

        Self {
            secret: SessionSecret(secret),
            fingerprint,
        }
    }

    /// Public half of the session keypair
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        x25519_dalek::PublicKey::from(&self.secret.0).to_bytes()
    }

    /// Session fingerprint
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Diffie-Hellman with a peer's public key
    ///
    /// Returns `None` for low-order peer points.
    #[cfg(test)]
    fn agree(&self, peer_public: &[u8; 32]) -> Option<[u8; 32]> {
        let peer = x25519_dalek::PublicKey::from(*peer_public);
        let shared = self.secret.0.diffie_hellman(&peer);
        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }
        Some(*shared.as_bytes())
    }
}

impl fmt::Debug for SessionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMaterial")
            .field("public", &hex::encode(self.public_key()))
            .field("fingerprint", &hex::encode(&self.fingerprint[..8]))
            .finish_non_exhaustive()
    }
}

/// Reference to an initialized session
///
/// Cheap to clone; carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Session fingerprint
    pub fingerprint: [u8; 32],
    /// Public half of the session keypair
    pub public_key: [u8; 32],
    /// Client agent from the init config
    pub agent: String,
    /// Client version from the init config
    pub version: String,
    /// Backend log level requested by the client
    pub log_level: LogLevel,
    /// When the session was initialized
    pub initialized_at: SystemTime,
}

impl SessionHandle {
    /// Short hex form of the fingerprint for logs
    #[must_use]
    pub fn short_fingerprint(&self) -> String {
        hex::encode(&self.fingerprint[..8])
    }
}

/// Owns session state and material
#[derive(Debug, Default)]
pub struct SessionManager {
    session: Option<(SessionMaterial, SessionHandle)>,
}

impl SessionManager {
    /// Create an uninitialized session manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if self.session.is_some() {
            SessionStatus::Initialized
        } else {
            SessionStatus::Uninitialized
        }
    }

    /// Whether a session is ready for tunnel start
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Initialize the session with OS randomness
    pub fn init_session(&mut self, config: InitConfig) -> Result<SessionHandle> {
        self.init_session_with_rng(&mut OsRng, config)
    }

    /// Initialize the session with a caller-provided RNG
    pub fn init_session_with_rng<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        config: InitConfig,
    ) -> Result<SessionHandle> {
        if self.session.is_some() {
            return Err(TunnelError::AlreadyInitialized);
        }

        let material = SessionMaterial::generate(rng, &config);
        let handle = SessionHandle {
            fingerprint: material.fingerprint(),
            public_key: material.public_key(),
            agent: config.agent.clone(),
            version: config.version.clone(),
            log_level: config.log_level,
            initialized_at: SystemTime::now(),
        };

        tracing::info!(
            "Olm session initialized (agent: {}, fingerprint: {})",
            handle.agent,
            handle.short_fingerprint()
        );

        self.session = Some((material, handle.clone()));
        Ok(handle)
    }

    /// Handle of the current session
    #[must_use]
    pub fn handle(&self) -> Option<&SessionHandle> {
        self.session.as_ref().map(|(_, handle)| handle)
    }

    /// Drop the session; the secret is zeroized
    ///
    /// Returns true if a session existed.
    pub fn reset(&mut self) -> bool {
        let existed = self.session.take().is_some();
        if existed {
            tracing::info!("Olm session torn down");
        }
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agent: &str, version: &str) -> InitConfig {
        InitConfig {
            agent: agent.to_string(),
            version: version.to_string(),
            ..InitConfig::default()
        }
    }

    #[test]
    fn test_init_transitions_to_initialized() {
        let mut manager = SessionManager::new();
        assert_eq!(manager.status(), SessionStatus::Uninitialized);

        let handle = manager.init_session(config("android", "1.0")).unwrap();

        assert_eq!(manager.status(), SessionStatus::Initialized);
        assert_ne!(handle.public_key, [0u8; 32]);
        assert_eq!(manager.handle(), Some(&handle));
        assert_eq!(handle.version, "1.0");
    }

    #[test]
    fn test_second_init_keeps_material() {
        let mut manager = SessionManager::new();
        let first = manager.init_session(config("android", "1.0")).unwrap();

        let err = manager.init_session(config("android", "2.0")).unwrap_err();

        assert_eq!(err, TunnelError::AlreadyInitialized);
        assert_eq!(manager.handle().unwrap().fingerprint, first.fingerprint);
        assert_eq!(manager.handle().unwrap().version, "1.0");
    }

    #[test]
    fn test_reset_allows_reinit() {
        let mut manager = SessionManager::new();
        let first = manager.init_session(config("android", "1.0")).unwrap();

        assert!(manager.reset());
        assert!(!manager.reset());
        assert!(manager.handle().is_none());
        assert_eq!(manager.status(), SessionStatus::Uninitialized);

        let second = manager.init_session(config("android", "1.0")).unwrap();
        assert_ne!(first.public_key, second.public_key);
    }

    #[test]
    fn test_fingerprint_binds_client_identity() {
        let secret = [7u8; 32];
        let mut rng_a = FixedRng(secret);
        let mut rng_b = FixedRng(secret);

        let a = SessionMaterial::generate(&mut rng_a, &config("android", "1.0"));
        let b = SessionMaterial::generate(&mut rng_b, &config("ios", "1.0"));

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let a = SessionMaterial::generate(&mut OsRng, &InitConfig::default());
        let b = SessionMaterial::generate(&mut OsRng, &InitConfig::default());

        let ab = a.agree(&b.public_key()).unwrap();
        let ba = b.agree(&a.public_key()).unwrap();
        assert_eq!(ab, ba);

        assert!(a.agree(&[0u8; 32]).is_none());
    }

    #[test]
    fn test_debug_hides_secret() {
        let material = SessionMaterial::generate(&mut OsRng, &InitConfig::default());
        let debug = format!("{material:?}");
        assert!(debug.contains("public"));
        assert!(!debug.contains("secret"));
    }

    /// Deterministic RNG that fills every request with the same byte pattern
    struct FixedRng([u8; 32]);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
        }

        fn next_u64(&mut self) -> u64 {
            u64::from(self.next_u32())
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for (i, b) in dest.iter_mut().enumerate() {
                *b = self.0[i % 32];
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for FixedRng {}
}
