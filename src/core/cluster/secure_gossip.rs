// src/core/cluster/secure_gossip.rs

use crate::core::cluster::gossip::GossipMessage;
use crate::core::errors::AgentError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
pub type Signature = [u8; 32];

const UNSIGNED: Signature = [0u8; 32];

/// The datagram actually sent over UDP: a gossip message and its HMAC.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone)]
pub struct SecureGossipMessage {
    pub message: GossipMessage,
    pub signature: Signature,
}

fn sign(message: &GossipMessage, secret: &str) -> Result<Signature, AgentError> {
    let bytes = bincode::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| AgentError::Gossip(format!("failed to encode message for signing: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AgentError::Gossip("invalid HMAC key".to_string()))?;
    mac.update(&bytes);
    let mut signature = UNSIGNED;
    signature.copy_from_slice(&mac.finalize().into_bytes());
    Ok(signature)
}

impl SecureGossipMessage {
    /// Signs `message` with `secret`. Without a secret the signature is all zeroes.
    pub fn new(message: GossipMessage, secret: Option<&str>) -> Result<Self, AgentError> {
        let signature = match secret {
            Some(secret) => sign(&message, secret)?,
            None => UNSIGNED,
        };
        Ok(Self { message, signature })
    }

    /// Checks the signature. Without a secret only unsigned messages pass;
    /// with one, unsigned messages never do.
    pub fn verify(&self, secret: Option<&str>) -> bool {
        let Some(secret) = secret else {
            return self.signature == UNSIGNED;
        };
        if self.signature == UNSIGNED {
            return false;
        }
        let Ok(bytes) = bincode::encode_to_vec(&self.message, bincode::config::standard()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(&bytes);
        mac.verify_slice(&self.signature).is_ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>, AgentError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AgentError::Gossip(format!("failed to encode datagram: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AgentError> {
        bincode::decode_from_slice::<Self, _>(bytes, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|e| AgentError::Gossip(format!("failed to decode datagram: {e}")))
    }
}
