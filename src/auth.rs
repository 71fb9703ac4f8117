use std::fmt;

/// SASL mechanisms negotiated during `connection.start-ok`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SASLMechanism {
  Plain,
  AMQPlain,
}

impl Default for SASLMechanism {
  fn default() -> Self {
    SASLMechanism::Plain
  }
}

impl fmt::Display for SASLMechanism {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SASLMechanism::Plain    => "PLAIN",
      SASLMechanism::AMQPlain => "AMQPLAIN",
    })
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
  username: String,
  password: String,
}

impl Default for Credentials {
  fn default() -> Credentials {
    Credentials::new("guest".to_string(), "guest".to_string())
  }
}

impl Credentials {
  pub fn new(username: String, password: String) -> Credentials {
    Credentials { username, password }
  }

  pub fn username(&self) -> &str {
    &self.username
  }

  pub(crate) fn sasl_auth_string(&self, mechanism: SASLMechanism) -> String {
    match mechanism {
      SASLMechanism::Plain    => format!("\0{}\0{}", self.username, self.password),
      SASLMechanism::AMQPlain => self.amqplain_auth_string(),
    }
  }

  /// AMQPLAIN responses are a field table stripped of its size prefix:
  /// {LOGIN: longstr, PASSWORD: longstr}.
  fn amqplain_auth_string(&self) -> String {
    let mut buf = Vec::new();
    put_longstr_entry(&mut buf, "LOGIN", &self.username);
    put_longstr_entry(&mut buf, "PASSWORD", &self.password);
    // the response is raw table bytes on the wire, not text: the length
    // prefixes are not necessarily valid UTF-8 and must stay byte-exact
    unsafe { String::from_utf8_unchecked(buf) }
  }
}

fn put_longstr_entry(buf: &mut Vec<u8>, name: &str, value: &str) {
  buf.push(name.len() as u8);
  buf.extend_from_slice(name.as_bytes());
  buf.push(b'S');
  buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
  buf.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_auth_string() {
    let credentials = Credentials::default();
    assert_eq!(credentials.sasl_auth_string(SASLMechanism::Plain), "\0guest\0guest");
  }

  #[test]
  fn amqplain_auth_string() {
    let credentials = Credentials::new("user".to_string(), "pw".to_string());
    let expected = b"\x05LOGINS\x00\x00\x00\x04user\x08PASSWORDS\x00\x00\x00\x02pw";
    assert_eq!(credentials.sasl_auth_string(SASLMechanism::AMQPlain).as_bytes(), &expected[..]);
  }

  #[test]
  fn amqplain_auth_string_keeps_long_credentials_byte_exact() {
    // a 200-byte value puts 0xc8 in the length prefix, which is not
    // valid standalone UTF-8
    let password = "p".repeat(200);
    let credentials = Credentials::new("user".to_string(), password.clone());
    let mut expected = Vec::new();
    expected.extend_from_slice(b"\x05LOGINS\x00\x00\x00\x04user\x08PASSWORDS");
    expected.extend_from_slice(&200u32.to_be_bytes());
    expected.extend_from_slice(password.as_bytes());
    assert_eq!(
      credentials.sasl_auth_string(SASLMechanism::AMQPlain).as_bytes(),
      expected.as_slice()
    );
  }
}
