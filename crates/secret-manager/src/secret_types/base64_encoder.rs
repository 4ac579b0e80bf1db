//! Base64 encoding of another secret.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use serde::Deserialize;

use super::{SecretType, months_from};
use crate::context::RotationContext;
use crate::error::Result;
use crate::types::{SecretData, SecretReference};

/// Parameters for [`Base64Encoder`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Base64EncoderParameters {
    /// The secret to encode.
    pub secret: SecretReference,
}

/// Stores the base64 encoding of the referenced secret's value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl Base64Encoder {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "base64-encoder";
}

impl SecretType for Base64Encoder {
    type Parameters = Base64EncoderParameters;

    fn secret_references(&self, parameters: &Self::Parameters) -> Vec<SecretReference> {
        vec![parameters.secret.clone()]
    }

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let source = context.require_secret_value(&parameters.secret).await?;
            Ok(vec![SecretData::new(
                STANDARD.encode(source.value()),
                None,
                months_from(context.now(), 1),
            )])
        })
    }
}
