use crate::{auth::SASLMechanism, types::FieldTable};

/// Client-side options for the connection handshake.
///
/// `client_properties` entries win over the defaults this crate announces
/// (product, version, platform, copyright, information).
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionProperties {
  pub mechanism:         SASLMechanism,
  pub locale:            String,
  pub client_properties: FieldTable,
}

impl Default for ConnectionProperties {
  fn default() -> Self {
    Self {
      mechanism:         SASLMechanism::default(),
      locale:            "en_US".to_string(),
      client_properties: FieldTable::default(),
    }
  }
}
