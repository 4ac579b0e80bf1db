//! Random bytes, base64 encoded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use rand::RngCore;
use serde::Deserialize;
use zeroize::Zeroizing;

use super::{SecretType, months_from};
use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::types::SecretData;

/// Parameters for [`RandomBase64`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RandomBase64Parameters {
    /// Number of random bytes before encoding.
    #[serde(default = "default_bytes")]
    pub bytes: usize,
}

fn default_bytes() -> usize {
    32
}

/// Generates `bytes` random bytes; rotated monthly, never expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBase64;

impl RandomBase64 {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "random-base64";
}

impl SecretType for RandomBase64 {
    type Parameters = RandomBase64Parameters;

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            if parameters.bytes == 0 {
                return Err(Error::invalid_parameters(context.name(), "bytes must be positive"));
            }
            let mut bytes = Zeroizing::new(vec![0u8; parameters.bytes]);
            rand::thread_rng().fill_bytes(&mut bytes);
            Ok(vec![SecretData::new(
                STANDARD.encode(bytes.as_slice()),
                None,
                months_from(context.now(), 1),
            )])
        })
    }
}
